use axum::{extract::State, Json};
use bson::Document;
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{InsertResponse, JsonBody},
};

/// Users are stored as whatever profile the client sends; only `email` is read.
#[derive(Clone)]
pub struct UserCollection(pub Collection<Document>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<Document>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum RegisterResponse {
    Exists { message: String },
    Created(InsertResponse),
}

/// Inserts the user unless one with the same email is already stored.
///
/// Lookup and insert are separate calls, so two concurrent registrations of a
/// new email can both insert.
#[tracing::instrument(skip_all, fields(email = tracing::field::Empty))]
pub async fn register(
    State(users): State<UserCollection>,
    JsonBody(user): JsonBody<Document>,
) -> Result<Json<RegisterResponse>, Error> {
    let email = user
        .get_str("email")
        .map_err(|_| Error::MissingField("email"))?
        .to_string();
    tracing::Span::current().record("email", email.as_str());

    let existing = users
        .find_one(bson::doc! { "email": &email }, None)
        .await?;

    if existing.is_some() {
        tracing::debug!("user already registered");
        return Ok(Json(RegisterResponse::Exists {
            message: "User already exists".to_string(),
        }));
    }

    let result = users
        .insert_one(&user, None)
        .await
        .tap_err(|err| tracing::debug!("failed inserting user: {}", err))?;

    Ok(Json(RegisterResponse::Created(result.into())))
}
