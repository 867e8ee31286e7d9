pub mod chat_service;
pub mod health_service;
