/// HTTP client for the event backend.
pub mod api_client;
/// Round countdown derived from an absolute end time.
pub mod countdown;
/// Per-round attendee flow composing motion, countdown and round state.
pub mod game_session;
/// Shake detection from raw acceleration samples.
pub mod motion;
/// Reconnecting push channel with typed subscriptions.
pub mod transport;
/// WebSocket connector backing the push channel.
pub mod ws_connector;
