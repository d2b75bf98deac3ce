//! Client side of the portfolio demo apps: a signed-in session, a
//! WebSocket chat room, a REST-backed todo list and an Open-Meteo weather
//! lookup.
//!
//! Everything hangs off one explicitly built [`SessionStore`]; the chat and
//! todo view-models borrow it through an `Arc` to read the identity and
//! credential.

pub mod chat;
pub mod config;
pub mod error;
pub mod http;
pub mod messages;
pub mod models;
pub mod session;
pub mod storage;
pub mod todo;
pub mod weather;

pub use chat::{ChatState, ChatViewModel, ConnectionState, DEFAULT_ROOM};
pub use config::Config;
pub use error::{AppError, Result};
pub use messages::{ClientFrame, ServerFrame};
pub use models::{ChatMessage, Credential, Identity, MessageKind, TodoItem, TodoStatus, WeatherSnapshot};
pub use session::SessionStore;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use todo::{TodoState, TodoViewModel};
pub use weather::{TemperatureUnit, WeatherClient, WeatherState, WeatherViewModel};
