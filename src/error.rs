// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NvrError {
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store constraint violated: {0}")]
    StoreUnique(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Camera request failed: {0}")]
    Camera(String),

    #[error("Metadata parser error: {0}")]
    Parser(String),

    #[error("Serial error: {0}")]
    Serial(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NvrError>;
