pub mod plan;
pub mod signup;
pub mod subscription;
pub mod user;
