use std::str::FromStr;

use axum::{
    extract::{FromRequest, FromRequestParts, Path},
    http::request::Parts,
};
use bson::{oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::{macros::format_description, OffsetDateTime};

use crate::error::Error;

pub fn parse_object_id(value: &str) -> Result<ObjectId, Error> {
    ObjectId::from_str(value)
        .map_err(|_| Error::InvalidObjectId(value.to_string()))
        .tap_err(|_| tracing::debug!("rejected malformed object id {:?}", value))
}

/// `:id` path segment parsed as an [`ObjectId`].
#[derive(Debug, Clone, Copy)]
pub struct PathObjectId(pub ObjectId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for PathObjectId
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state).await?;

        parse_object_id(&id).map(Self)
    }
}

/// JSON request body whose parse failures answer with the usual error body.
#[derive(Debug, Clone, FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct JsonBody<T>(pub T);

/// ISO-8601 in UTC with millisecond precision, e.g. `2024-05-01T10:30:00.000Z`.
pub fn iso_timestamp(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.to_offset(time::UtcOffset::UTC).format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ))
}

/// Renders BSON the way the JavaScript driver serializes documents to JSON:
/// object ids as hex strings, dates as ISO-8601 strings.
pub fn bson_to_json(value: Bson) -> serde_json::Value {
    match value {
        Bson::ObjectId(id) => serde_json::Value::String(id.to_hex()),
        Bson::DateTime(date) => match iso_timestamp(date.into()) {
            Ok(it) => serde_json::Value::String(it),
            Err(_) => Bson::DateTime(date).into_relaxed_extjson(),
        },
        Bson::Document(doc) => document_to_json(doc),
        Bson::Array(items) => serde_json::Value::Array(items.into_iter().map(bson_to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

pub fn document_to_json(doc: Document) -> serde_json::Value {
    serde_json::Value::Object(
        doc.into_iter()
            .map(|(key, value)| (key, bson_to_json(value)))
            .collect(),
    )
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InsertResponse {
    pub acknowledged: bool,
    pub inserted_id: serde_json::Value,
}

impl From<mongodb::results::InsertOneResult> for InsertResponse {
    fn from(value: mongodb::results::InsertOneResult) -> Self {
        Self {
            acknowledged: true,
            inserted_id: bson_to_json(value.inserted_id),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl From<mongodb::results::DeleteResult> for DeleteResponse {
    fn from(value: mongodb::results::DeleteResult) -> Self {
        Self {
            acknowledged: true,
            deleted_count: value.deleted_count,
        }
    }
}
