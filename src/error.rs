// src/error.rs
use crate::views;
use log::{error, warn};
use std::convert::Infallible;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::{Rejection, Reply};

#[derive(Error, Debug)]
pub enum AppError {
    /// A refusal shown to the user as an apology page.
    #[error("{message}")]
    Apology { message: String, status: StatusCode },

    #[error("username already exists")]
    UsernameTaken,

    #[error("not enough funds")]
    InsufficientFunds,

    #[error("not enough shares")]
    InsufficientShares,

    #[error("login required")]
    LoginRequired,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("quote service request failed: {0}")]
    QuoteTransport(#[from] reqwest::Error),

    #[error("quote service error: {0}")]
    QuoteService(String),

    #[error("session token error: {0}")]
    Session(#[from] jsonwebtoken::errors::Error),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("invalid stored amount: {0}")]
    Amount(String),

    #[error("failed to build response: {0}")]
    Response(#[from] warp::http::Error),
}

impl AppError {
    pub fn apology(message: impl Into<String>, status: StatusCode) -> Self {
        AppError::Apology {
            message: message.into(),
            status,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Apology { status, .. } => *status,
            AppError::UsernameTaken | AppError::InsufficientShares => StatusCode::CONFLICT,
            AppError::InsufficientFunds => StatusCode::FORBIDDEN,
            AppError::LoginRequired => StatusCode::SEE_OTHER,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text shown to the user. Server-side failures are not described.
    pub fn public_message(&self) -> String {
        if self.status().is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl Reject for AppError {}

pub type Result<T> = std::result::Result<T, AppError>;

pub async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    if let Some(app_err) = err.find::<AppError>() {
        if matches!(app_err, AppError::LoginRequired) {
            return Ok(warp::reply::with_header(
                warp::reply::with_status(warp::reply::html(String::new()), StatusCode::SEE_OTHER),
                "location",
                "/login",
            )
            .into_response());
        }
        let status = app_err.status();
        if status.is_server_error() {
            error!("Request failed: {}", app_err);
        } else {
            warn!("Request refused ({}): {}", status.as_u16(), app_err);
        }
        return Ok(apology_response(&app_err.public_message(), status));
    }

    let (message, status) = if err.is_not_found() {
        ("page not found", StatusCode::NOT_FOUND)
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        ("request too large", StatusCode::PAYLOAD_TOO_LARGE)
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        ("content length required", StatusCode::LENGTH_REQUIRED)
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some()
        || err.find::<warp::body::BodyDeserializeError>().is_some()
    {
        ("malformed form submission", StatusCode::BAD_REQUEST)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        // Sibling routes on the same path add this to every body rejection.
        ("method not allowed", StatusCode::METHOD_NOT_ALLOWED)
    } else {
        error!("Unhandled rejection: {:?}", err);
        ("internal server error", StatusCode::INTERNAL_SERVER_ERROR)
    };
    Ok(apology_response(message, status))
}

fn apology_response(message: &str, status: StatusCode) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::html(views::apology(message, status)), status)
        .into_response()
}
