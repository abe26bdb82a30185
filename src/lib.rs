// Encrypted token storage (AES-256-GCM + SQLite)
pub mod credentials;

// Session credentials (HS256 JWT)
pub mod session;

// Provider OAuth: code exchange, profile, refresh
pub mod oauth;

// Just-in-time access token resolution
pub mod delegation;

// Workspace provisioning for new accounts
pub mod workspace;

// Account linking
pub mod accounts;

// Bearer credential transport
pub mod auth;

// HTTP surface
pub mod api;

// Environment and TOML configuration
pub mod config;
