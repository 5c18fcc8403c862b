pub mod models;
pub mod presence;
pub mod service;

pub use models::{Family, FamilyMember, Location, MemberDistance, MemberOverview, MemberStatus};
pub use presence::PresenceReporter;
pub use service::FamilyRepository;
