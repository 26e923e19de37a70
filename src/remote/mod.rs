//! Typed clients over the Apps Script and Drive REST APIs, plus the session
//! token provider. The rest of the crate only sees the trait seams so tests
//! can substitute in-memory fakes.

pub mod auth;
pub mod drive;
pub mod gcp;
pub mod script;
pub mod types;

pub use auth::{AuthStatus, SessionAuth, TokenProvider};
pub use drive::{ContainerType, DriveFile, DriveHttpClient, DriveService};
pub use gcp::GcpProjectCache;
pub use script::{ScriptHttpClient, ScriptService};
pub use types::{Deployment, FileUpdate, ProcessInfo, Project, RemoteFile, Version};
