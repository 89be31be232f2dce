use crate::limits::*;
use crate::model::*;

use super::ReservationError;

/// The candidate as a `Span`, if well formed and within limits.
pub(crate) fn validate_interval(start: Ts, end: Ts) -> Result<Span, ReservationError> {
    let span = Span::try_new(start, end).ok_or(ReservationError::InvalidInterval { start, end })?;
    if span.start < MIN_VALID_TIMESTAMP || span.end > MAX_VALID_TIMESTAMP {
        return Err(ReservationError::LimitExceeded("timestamp out of range"));
    }
    if span.duration() > MAX_SPAN_DURATION {
        return Err(ReservationError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// True iff `candidate` overlaps any of `existing` (half-open test).
/// Order of `existing` does not matter.
pub fn conflicts(candidate: &Span, existing: &[Span]) -> bool {
    existing.iter().any(|s| s.overlaps(candidate))
}

/// First reservation whose interval overlaps `candidate`, if any.
/// Same overlap test as [`conflicts`], applied row by row.
pub fn find_conflict<'a>(
    candidate: &Span,
    existing: impl IntoIterator<Item = &'a Reservation>,
) -> Option<&'a Reservation> {
    existing
        .into_iter()
        .find(|r| conflicts(candidate, std::slice::from_ref(&r.span)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ts = 3600;

    #[test]
    fn empty_schedule_never_conflicts() {
        assert!(!conflicts(&Span::new(0, H), &[]));
    }

    #[test]
    fn adjacent_intervals_do_not_conflict() {
        let existing = [Span::new(0, H), Span::new(2 * H, 3 * H)];
        assert!(!conflicts(&Span::new(H, 2 * H), &existing));
    }

    #[test]
    fn partial_contained_and_covering_overlaps() {
        let existing = [Span::new(H, 2 * H)];
        assert!(conflicts(&Span::new(H / 2, H + 1), &existing)); // tail overlap
        assert!(conflicts(&Span::new(2 * H - 1, 3 * H), &existing)); // head overlap
        assert!(conflicts(&Span::new(H + 10, H + 20), &existing)); // inside
        assert!(conflicts(&Span::new(0, 3 * H), &existing)); // covering
        assert!(conflicts(&Span::new(H, 2 * H), &existing)); // identical
    }

    #[test]
    fn unsorted_input_is_fine() {
        let existing = [Span::new(9 * H, 10 * H), Span::new(0, H), Span::new(4 * H, 5 * H)];
        assert!(conflicts(&Span::new(H / 2, H), &existing));
        assert!(conflicts(&Span::new(9 * H + 1, 9 * H + 2), &existing));
        assert!(!conflicts(&Span::new(5 * H, 9 * H), &existing));
    }

    #[test]
    fn find_conflict_names_the_row() {
        let rows: Vec<Reservation> = [(4 * H, 5 * H), (0, H)]
            .into_iter()
            .map(|(s, e)| Reservation { id: Ulid::new(), room_id: 1, user_id: 1, span: Span::new(s, e) })
            .collect();
        let hit = find_conflict(&Span::new(30, 60), &rows).unwrap();
        assert_eq!(hit.span, Span::new(0, H));
        assert!(find_conflict(&Span::new(H, 4 * H), &rows).is_none());
    }

    #[test]
    fn find_conflict_agrees_with_conflicts() {
        let rows: Vec<Reservation> = [(0, H), (2 * H, 3 * H), (5 * H, 6 * H)]
            .into_iter()
            .map(|(s, e)| Reservation { id: Ulid::new(), room_id: 1, user_id: 1, span: Span::new(s, e) })
            .collect();
        let spans: Vec<Span> = rows.iter().map(|r| r.span).collect();
        for k in 0..14 {
            let candidate = Span::new(k * H / 2, k * H / 2 + H);
            assert_eq!(
                find_conflict(&candidate, &rows).is_some(),
                conflicts(&candidate, &spans),
                "candidate {candidate:?}"
            );
        }
    }

    #[test]
    fn validate_rejects_empty_and_reversed() {
        assert!(matches!(
            validate_interval(H, H),
            Err(ReservationError::InvalidInterval { start: H, end: H })
        ));
        assert!(matches!(
            validate_interval(2 * H, H),
            Err(ReservationError::InvalidInterval { .. })
        ));
        assert_eq!(validate_interval(0, H).unwrap(), Span::new(0, H));
    }

    #[test]
    fn validate_enforces_limits() {
        assert!(matches!(
            validate_interval(-H, 0),
            Err(ReservationError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_interval(0, MAX_SPAN_DURATION + 1),
            Err(ReservationError::LimitExceeded("span too wide"))
        ));
        assert!(matches!(
            validate_interval(MAX_VALID_TIMESTAMP - 10, MAX_VALID_TIMESTAMP + 10),
            Err(ReservationError::LimitExceeded("timestamp out of range"))
        ));
    }
}
