use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use bson::{oid::ObjectId, Document};
use mongodb::{results::UpdateResult, ClientSession};
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{document_to_json, DeleteResponse, InsertResponse, JsonBody, PathObjectId},
};

pub const PAYMENT_STATUS_PAID: &str = "paid";

/// Parcels keep the client's own shape. The server reads `created_by`,
/// `creation_date` and writes `payment_status`.
#[derive(Clone)]
pub struct ParcelCollection(pub Collection<Document>);

impl std::ops::Deref for ParcelCollection {
    type Target = Collection<Document>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ParcelCollection {
    /// Sets `payment_status` to paid. `modified_count` is zero when the parcel
    /// is missing or was already paid.
    pub async fn mark_paid_with_session(
        &self,
        id: ObjectId,
        session: &mut ClientSession,
    ) -> Result<UpdateResult, mongodb::error::Error> {
        self.update_one_by_id_with_session(
            id,
            bson::doc! {
                "$set": { "payment_status": PAYMENT_STATUS_PAID }
            },
            session,
        )
        .await
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IndexQuery {
    pub email: Option<String>,
}

impl IndexQuery {
    pub fn filter(&self) -> Document {
        match self.email.as_deref().filter(|it| !it.is_empty()) {
            Some(email) => bson::doc! { "created_by": email },
            None => bson::doc! {},
        }
    }
}

pub async fn index(
    State(parcels): State<ParcelCollection>,
    Query(query): Query<IndexQuery>,
) -> Result<Json<Vec<serde_json::Value>>, Error> {
    let parcels = parcels
        .find_sorted(query.filter(), bson::doc! { "creation_date": -1 })
        .await
        .map_err(Error::failed("Failed to fetch parcels"))?;

    Ok(Json(parcels.into_iter().map(document_to_json).collect()))
}

pub async fn show(
    State(parcels): State<ParcelCollection>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<serde_json::Value>, Error> {
    let parcel = parcels
        .find_one_by_id(id)
        .await
        .map_err(Error::failed("Failed to fetch parcel"))?
        .ok_or(Error::ParcelNotFound)
        .tap_err(|_| tracing::debug!("tried accessing non existing parcel {}", id))?;

    Ok(Json(document_to_json(parcel)))
}

#[tracing::instrument(skip_all)]
pub async fn create(
    State(parcels): State<ParcelCollection>,
    JsonBody(parcel): JsonBody<Document>,
) -> Result<(StatusCode, Json<InsertResponse>), Error> {
    tracing::debug!("creating parcel for {:?}", parcel.get_str("created_by").ok());

    let result = parcels
        .insert_one(&parcel, None)
        .await
        .map_err(Error::failed("Failed to save parcel"))?;

    Ok((StatusCode::CREATED, Json(result.into())))
}

/// Answers with the raw delete result; deleting a missing parcel is not an error.
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn delete(
    State(parcels): State<ParcelCollection>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<DeleteResponse>, Error> {
    let result = parcels
        .delete_one_by_id(id)
        .await
        .map_err(Error::failed("Delete failed"))?;

    tracing::debug!("deleted {} parcel(s)", result.deleted_count);

    Ok(Json(result.into()))
}
