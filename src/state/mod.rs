/// Local view of the current round.
pub mod game;
/// Round lifecycle reconciliation and persistence.
pub mod round_machine;
/// Broadcast notifications for round lifecycle changes.
pub mod signals;
