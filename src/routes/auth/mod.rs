mod handler;
mod model;

pub use handler::{login, register};
pub use model::{Credentials, LoginResponse, User, UserInfo};
