pub mod user;

pub use user::{NewUserInput, UserData, UserListData};
