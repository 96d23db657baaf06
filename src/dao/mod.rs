/// JSON-file backed storage scope.
pub mod file;
/// Storage key names.
pub mod keys;
/// In-memory storage scope.
pub mod memory;
/// Storage abstraction layer shared by every stateful component.
pub mod storage;
