use crate::model::*;

use super::{ReservationError, Scheduler};

impl Scheduler {
    /// Reservations of one room, ascending by start. No gate admission.
    pub async fn list_room_reservations(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<Reservation>, ReservationError> {
        if self.store.find_room(room_id).await?.is_none() {
            return Err(ReservationError::RoomNotFound(room_id));
        }
        Ok(self
            .store
            .list_reservations(ReservationFilter::Room(room_id))
            .await?)
    }

    /// Reservations held by one user across all rooms, ascending by start.
    pub async fn list_user_reservations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Reservation>, ReservationError> {
        Ok(self
            .store
            .list_reservations(ReservationFilter::User(user_id))
            .await?)
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, ReservationError> {
        Ok(self.store.list_rooms().await?)
    }

    pub async fn find_user(&self, id: UserId) -> Result<Option<User>, ReservationError> {
        Ok(self.store.find_user(id).await?)
    }
}
