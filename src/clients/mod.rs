pub mod circuit_breaker;
pub mod database;
pub mod email;
pub mod fcm;
pub mod health;
pub mod publisher;
pub mod rbmq;
pub mod redis;
pub mod template;
pub mod topology;
pub mod user;
