pub mod models;
pub mod repository;
pub mod window;

pub use models::{ChatCursor, ChatItem, ChatMessage, ChatPage, MessageType};
pub use repository::ChatRepository;
pub use window::{ChatWindow, ChatWindowHandle, ChatWindowState, ChatWindowView};
