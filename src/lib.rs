pub mod sdk;

// 重新导出常用类型和函数，方便外部使用
pub use sdk::{
    call_home::{CallHomeCoordinator, CallHomeListener, CallHomeRequest, CallHomeStatus},
    chat::{ChatItem, ChatMessage, ChatRepository, ChatWindow, ChatWindowHandle, MessageType},
    client::FamilyClient,
    config::{SdkConfig, SessionContext, AUTO_CLEAR_RADIUS_METERS},
    error::{SdkError, SdkResult},
    family::{FamilyRepository, PresenceReporter},
    geo::{distance_meters, GeoPoint},
    store::{MemoryStore, RemoteStore},
};
