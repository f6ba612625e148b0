use axum::{extract::State, http::StatusCode, Json};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{parse_object_id, InsertResponse, JsonBody},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub tracking_id: Option<String>,
    pub parcel_id: ObjectId,
    pub status: Option<String>,
    pub location: Option<String>,
    pub note: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: bson::DateTime,
}

#[derive(Clone)]
pub struct TrackingCollection(pub Collection<TrackingModel>);

impl std::ops::Deref for TrackingCollection {
    type Target = Collection<TrackingModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub tracking_id: Option<String>,
    pub parcel_id: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub note: Option<String>,
    pub updated_by: Option<String>,
}

impl CreateRequest {
    pub fn into_model(self, now: OffsetDateTime) -> Result<TrackingModel, Error> {
        let parcel_id = self.parcel_id.ok_or(Error::MissingField("parcelId"))?;

        Ok(TrackingModel {
            id: ObjectId::new(),
            tracking_id: self.tracking_id,
            parcel_id: parse_object_id(&parcel_id)?,
            status: self.status,
            location: self.location,
            note: self.note,
            updated_by: self.updated_by,
            updated_at: now.into(),
        })
    }
}

/// Appends a tracking event. The referenced parcel is not checked.
#[tracing::instrument(
    skip_all,
    fields(
        tracking_id = ?request.tracking_id,
        status = ?request.status,
    )
)]
pub async fn create(
    State(tracking): State<TrackingCollection>,
    JsonBody(request): JsonBody<CreateRequest>,
) -> Result<(StatusCode, Json<InsertResponse>), Error> {
    let model = request.into_model(OffsetDateTime::now_utc())?;

    let result = tracking
        .insert_one(&model, None)
        .await
        .map_err(Error::failed("Failed to insert tracking data"))?;

    Ok((StatusCode::CREATED, Json(result.into())))
}
