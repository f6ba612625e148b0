use axum::{
    http::{StatusCode, Uri},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(Uri),

    #[error("Parcel not found")]
    ParcelNotFound,

    #[error("Parcel not found or already paid.")]
    ParcelNotFoundOrPaid,

    #[error("{0} is not a valid object id")]
    InvalidObjectId(String),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{0}")]
    InvalidBody(String),

    #[error("{action}")]
    Failed {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    Gateway(#[from] GatewayError),
}

impl Error {
    /// Wraps an underlying failure behind a short message meant for the client.
    pub fn failed<E>(action: &'static str) -> impl FnOnce(E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        move |err| Self::Failed {
            action,
            source: err.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(..) | Self::ParcelNotFound | Self::ParcelNotFoundOrPaid => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidObjectId(..) | Self::MissingField(..) | Self::InvalidBody(..) => {
                StatusCode::BAD_REQUEST
            }
            Self::Failed { .. } | Self::DatabaseError(..) | Self::Gateway(..) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to the client. Storage failures stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::DatabaseError(..) => "Internal server error".to_string(),
            Self::Gateway(err) => err.client_message(),
            _ => self.to_string(),
        }
    }

    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
            ($id:ident {..}) => {
                Self::$id { .. }
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            NotFound(..),
            ParcelNotFound!,
            ParcelNotFoundOrPaid!,
            InvalidObjectId(..),
            MissingField(..),
            InvalidBody(..),
            Failed{..},
            DatabaseError(..),
            Gateway(..)
        }
        .to_string()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    pub r#type: String,
    pub message: String,
}

impl From<&Error> for ErrorJson {
    fn from(err: &Error) -> Self {
        Self {
            r#type: err.to_string_variant(),
            message: err.public_message(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);

        (self.status(), Json(ErrorJson::from(&self))).into_response()
    }
}

impl From<axum::extract::rejection::PathRejection> for Error {
    fn from(value: axum::extract::rejection::PathRejection) -> Self {
        Self::InvalidObjectId(value.body_text())
    }
}

impl From<axum::extract::rejection::JsonRejection> for Error {
    fn from(value: axum::extract::rejection::JsonRejection) -> Self {
        Self::InvalidBody(value.body_text())
    }
}
