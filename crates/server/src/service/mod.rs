pub mod auth;

pub use auth::{
    AuthCallbackRequest, AuthCallbackResponse, AuthService, AuthServiceBuilder, LoginRequest,
    MissingComponent,
};
