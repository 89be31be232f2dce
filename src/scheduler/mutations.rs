use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{find_conflict, validate_interval};
use super::{Removal, ReservationError, Scheduler};

impl Scheduler {
    /// Book `request.room_id` for `[start, end)` on behalf of `acting`.
    ///
    /// Validation and the room lookup happen before admission. The conflict
    /// scan and the insert run inside one gate permit and the room's
    /// exclusive section, so no two accepted reservations in a room overlap.
    pub async fn reserve(
        &self,
        request: ReservationRequest,
        acting: &User,
    ) -> Result<Reservation, ReservationError> {
        let result = self.try_reserve(request, acting).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::counter!(observability::RESERVATIONS_TOTAL,
            "tier" => acting.tier.label(), "outcome" => outcome)
        .increment(1);
        match &result {
            Ok(r) => info!(
                "reservation {} room {} user {} [{}, {}) by {} {}",
                r.id, r.room_id, r.user_id, r.span.start, r.span.end, acting.tier, acting.id
            ),
            Err(ReservationError::Store(e)) => {
                error!("reserve room {} failed: {e}", request.room_id)
            }
            Err(e) => warn!("reserve room {} by user {} refused: {e}", request.room_id, acting.id),
        }
        result
    }

    async fn try_reserve(
        &self,
        request: ReservationRequest,
        acting: &User,
    ) -> Result<Reservation, ReservationError> {
        let span = validate_interval(request.start, request.end)?;
        if self.store.find_room(request.room_id).await?.is_none() {
            return Err(ReservationError::RoomNotFound(request.room_id));
        }
        if acting.tier != Tier::Admin && request.user_id != acting.id {
            return Err(ReservationError::Unauthorized(acting.id));
        }

        let permit = self.admit(acting.tier).await?;
        let result = self.insert_if_free(request.room_id, request.user_id, span).await;
        permit.release().await;
        result
    }

    async fn insert_if_free(
        &self,
        room_id: RoomId,
        user_id: UserId,
        span: Span,
    ) -> Result<Reservation, ReservationError> {
        let _room = self.lock_room(room_id).await;
        let existing = self
            .store
            .list_reservations(ReservationFilter::Room(room_id))
            .await?;
        if let Some(hit) = find_conflict(&span, &existing) {
            return Err(ReservationError::Conflict { room_id, existing: hit.id });
        }
        if existing.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(ReservationError::LimitExceeded("too many reservations in room"));
        }
        let reservation = Reservation {
            id: Ulid::new(),
            room_id,
            user_id,
            span,
        };
        self.store.insert_reservation(&reservation).await?;
        Ok(reservation)
    }

    /// Delete reservations in `room_id` intersecting the closed range
    /// `[start, end]`. Rows the caller may not touch are skipped and listed
    /// in [`Removal::unauthorized`]. Each owner is notified once their row is
    /// gone. A store failure after the first delete stops the scan and is
    /// reported in [`Removal::incomplete`] next to the rows already deleted.
    pub async fn remove(
        &self,
        room_id: RoomId,
        start: Ts,
        end: Ts,
        acting: &User,
    ) -> Result<Removal, ReservationError> {
        if start > end {
            return Err(ReservationError::InvalidInterval { start, end });
        }
        if self.store.find_room(room_id).await?.is_none() {
            return Err(ReservationError::RoomNotFound(room_id));
        }

        let permit = self.admit(acting.tier).await?;
        let result = self.delete_matching(room_id, start, end, acting).await;
        permit.release().await;

        match &result {
            Ok(removal) => {
                metrics::counter!(observability::RESERVATIONS_REMOVED_TOTAL, "tier" => acting.tier.label())
                    .increment(removal.count() as u64);
                metrics::counter!(observability::REMOVALS_UNAUTHORIZED_TOTAL)
                    .increment(removal.unauthorized.len() as u64);
                info!(
                    "remove room {room_id} [{start}, {end}] by {} {}: {} deleted, {} skipped",
                    acting.tier,
                    acting.id,
                    removal.count(),
                    removal.unauthorized.len()
                );
            }
            Err(e) => error!("remove room {room_id} failed: {e}"),
        }
        result
    }

    async fn delete_matching(
        &self,
        room_id: RoomId,
        start: Ts,
        end: Ts,
        acting: &User,
    ) -> Result<Removal, ReservationError> {
        let _room = self.lock_room(room_id).await;
        let rows = self
            .store
            .list_reservations(ReservationFilter::Room(room_id))
            .await?;

        let mut removal = Removal::default();
        for row in rows.into_iter().filter(|r| r.span.touches(start, end)) {
            if acting.tier != Tier::Admin && acting.id != row.user_id {
                warn!("user {} may not remove reservation {} of user {}", acting.id, row.id, row.user_id);
                removal.unauthorized.push(row.id);
                continue;
            }
            match self.store.delete_reservation(row.id).await {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) if removal.deleted.is_empty() => return Err(e.into()),
                Err(e) => {
                    error!(
                        "remove room {room_id} stopped at reservation {} after {} deleted: {e}",
                        row.id,
                        removal.deleted.len()
                    );
                    removal.incomplete = Some(e);
                    break;
                }
            }
            match self.store.find_user(row.user_id).await {
                Ok(Some(owner)) => self.notifier.notify(&owner.contact, &modification_notice(&row)),
                Ok(None) => warn!("reservation {} has no owner record, notice skipped", row.id),
                Err(e) => warn!("owner lookup for reservation {} failed, notice skipped: {e}", row.id),
            }
            removal.deleted.push(row);
        }
        Ok(removal)
    }
}

pub(crate) fn modification_notice(r: &Reservation) -> String {
    format!(
        "YOUR RESERVATION HAS BEEN MODIFIED\nROOM {} - {} - {}",
        r.room_id,
        ctime(r.span.start),
        ctime(r.span.end)
    )
}
