use axum::{
    extract::{Query, State},
    Json,
};
use bson::{oid::ObjectId, Document};
use mongodb::{
    error::{ErrorKind, TRANSIENT_TRANSACTION_ERROR},
    options::{Acknowledgment, ReadConcern, TransactionOptions, WriteConcern},
};
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;

use crate::{
    error::Error,
    gateway::SharedGateway,
    mongo_ext::Collection,
    util::{document_to_json, iso_timestamp, parse_object_id, JsonBody},
};

use super::parcels::ParcelCollection;

pub const DEFAULT_CURRENCY: &str = "BDT";
pub const DEFAULT_PAYMENT_METHOD: &str = "Stripe";

const WRITE_CONFLICT_CODE: i32 = 112;

/// Paid amount, kept as the number type the client sent so `150` is stored
/// and listed as an integer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum Amount {
    Integer(i64),
    Decimal(f64),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "parcelId")]
    pub parcel_id: ObjectId,
    pub email: String,
    pub amount: Amount,
    pub currency: String,
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
    #[serde(rename = "paymentMethod")]
    pub payment_method: String,
    pub paid_at_string: String,
    pub paid_at: bson::DateTime,
}

#[derive(Clone)]
pub struct PaymentCollection(pub Collection<PaymentModel>);

impl std::ops::Deref for PaymentCollection {
    type Target = Collection<PaymentModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HistoryQuery {
    pub email: Option<String>,
}

/// Payment history of one payer, newest first.
///
/// Records are returned as stored, so older documents with missing fields
/// still list.
pub async fn index(
    State(payments): State<PaymentCollection>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<serde_json::Value>>, Error> {
    let history = Collection::from(payments.clone_with_type::<Document>())
        .find_sorted(
            bson::doc! { "email": query.email },
            bson::doc! { "paid_at": -1 },
        )
        .await
        .map_err(Error::failed("Failed to load payment history"))?;

    Ok(Json(history.into_iter().map(document_to_json).collect()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub parcel_id: String,
    pub email: String,
    pub amount: Amount,
    pub transaction_id: String,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
}

impl PaymentModel {
    pub fn new(
        parcel_id: ObjectId,
        request: ConfirmRequest,
        now: OffsetDateTime,
    ) -> Result<Self, Error> {
        // Both representations come from the same millisecond instant.
        let paid_at = bson::DateTime::from(now);
        let paid_at_string = iso_timestamp(OffsetDateTime::from(paid_at))
            .map_err(Error::failed("Internal server error"))?;

        Ok(Self {
            id: ObjectId::new(),
            parcel_id,
            email: request.email,
            amount: request.amount,
            currency: request
                .currency
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            transaction_id: request.transaction_id,
            payment_method: request
                .payment_method
                .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string()),
            paid_at_string,
            paid_at,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageResponse {
    pub message: String,
}

/// Marks the parcel paid and records the payment in one transaction.
///
/// A parcel that is missing or already paid leaves no history record behind.
#[tracing::instrument(
    skip_all,
    fields(
        parcel_id = %request.parcel_id,
        transaction_id = %request.transaction_id,
    )
)]
pub async fn confirm(
    State(mongo): State<mongodb::Client>,
    State(parcels): State<ParcelCollection>,
    State(payments): State<PaymentCollection>,
    JsonBody(request): JsonBody<ConfirmRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let parcel_id = parse_object_id(&request.parcel_id)?;

    let mut session = mongo.start_session(None).await?;

    let transaction_options = TransactionOptions::builder()
        .read_concern(ReadConcern::snapshot())
        .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
        .build();

    session.start_transaction(transaction_options).await?;

    let updated = match parcels.mark_paid_with_session(parcel_id, &mut session).await {
        Ok(updated) => updated,
        Err(err) if is_write_conflict(&err) => {
            tracing::debug!("parcel paid by a concurrent confirmation: {}", err);
            session.abort_transaction().await?;

            return Err(Error::ParcelNotFoundOrPaid);
        }
        Err(err) => return Err(err.into()),
    };

    if updated.modified_count == 0 {
        session.abort_transaction().await?;

        return Err(Error::ParcelNotFoundOrPaid)
            .tap_err(|_| tracing::debug!("parcel missing or already paid"));
    }

    let payment = PaymentModel::new(parcel_id, request, OffsetDateTime::now_utc())?;

    payments
        .insert_one_with_session(&payment, None, &mut session)
        .await?;

    session.commit_transaction().await?;

    tracing::debug!("payment {} recorded", payment.id);

    Ok(Json(MessageResponse {
        message: "Payment confirmed and history saved.".to_string(),
    }))
}

/// Another transaction updated the parcel first.
fn is_write_conflict(err: &mongodb::error::Error) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
        || matches!(err.kind.as_ref(), ErrorKind::Command(command) if command.code == WRITE_CONFLICT_CODE)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub amount_in_cents: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    pub client_secret: String,
}

#[tracing::instrument(skip_all, fields(amount = request.amount_in_cents))]
pub async fn create_intent(
    State(gateway): State<SharedGateway>,
    JsonBody(request): JsonBody<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, Error> {
    let intent = gateway
        .create_payment_intent(request.amount_in_cents)
        .await?;

    Ok(Json(CreateIntentResponse {
        client_secret: intent.client_secret,
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{extract::Query, Json};
    use bson::oid::ObjectId;
    use serde_json::json;
    use time::macros::datetime;

    use crate::{
        api::{parcels::PAYMENT_STATUS_PAID, tests::bootstrap},
        error::Error,
        util::{document_to_json, JsonBody},
    };

    use super::{Amount, ConfirmRequest, HistoryQuery, PaymentModel};

    fn confirm_request(parcel_id: ObjectId, email: &str, transaction_id: &str) -> ConfirmRequest {
        ConfirmRequest {
            parcel_id: parcel_id.to_hex(),
            email: email.to_string(),
            amount: Amount::Integer(150),
            transaction_id: transaction_id.to_string(),
            currency: None,
            payment_method: None,
        }
    }

    #[test]
    fn test_payment_defaults() {
        let parcel_id = ObjectId::new();
        let now = datetime!(2024-05-01 10:30:05.5 UTC);

        let model =
            PaymentModel::new(parcel_id, confirm_request(parcel_id, "a@example.com", "pi_1"), now)
                .unwrap();

        assert_eq!(model.parcel_id, parcel_id);
        assert_eq!(model.currency, "BDT");
        assert_eq!(model.payment_method, "Stripe");
        assert_eq!(model.paid_at_string, "2024-05-01T10:30:05.500Z");
        assert_eq!(model.paid_at, bson::DateTime::from(now));
    }

    #[test]
    fn test_payment_keeps_explicit_currency() {
        let parcel_id = ObjectId::new();
        let request = ConfirmRequest {
            currency: Some("USD".to_string()),
            payment_method: Some("card".to_string()),
            ..confirm_request(parcel_id, "a@example.com", "pi_1")
        };

        let model = PaymentModel::new(parcel_id, request, datetime!(2024-05-01 0:00 UTC)).unwrap();

        assert_eq!(model.currency, "USD");
        assert_eq!(model.payment_method, "card");
    }

    #[test]
    fn test_stored_field_names() {
        let parcel_id = ObjectId::new();
        let model = PaymentModel::new(
            parcel_id,
            confirm_request(parcel_id, "a@example.com", "pi_1"),
            datetime!(2024-05-01 0:00 UTC),
        )
        .unwrap();

        let doc = bson::to_document(&model).unwrap();

        assert_eq!(doc.get_object_id("parcelId").unwrap(), parcel_id);
        assert_eq!(doc.get_str("transactionId").unwrap(), "pi_1");
        assert_eq!(doc.get_str("paymentMethod").unwrap(), "Stripe");
        assert!(doc.get_datetime("paid_at").is_ok());
        assert_eq!(
            doc.get_str("paid_at_string").unwrap(),
            "2024-05-01T00:00:00.000Z"
        );
    }

    #[test]
    fn test_amount_keeps_number_type() {
        let parcel_id = ObjectId::new();
        let now = datetime!(2024-05-01 0:00 UTC);

        for (amount, stored, rendered) in [
            (json!(150), bson::Bson::Int64(150), json!(150)),
            (json!(99.5), bson::Bson::Double(99.5), json!(99.5)),
        ] {
            let request: ConfirmRequest = serde_json::from_value(json!({
                "parcelId": parcel_id.to_hex(),
                "email": "a@example.com",
                "amount": amount,
                "transactionId": "pi_1",
            }))
            .unwrap();

            let model = PaymentModel::new(parcel_id, request, now).unwrap();
            let doc = bson::to_document(&model).unwrap();

            assert_eq!(doc.get("amount"), Some(&stored));
            assert_eq!(document_to_json(doc)["amount"], rendered);
        }
    }

    async fn insert_parcel(bootstrap: &crate::api::tests::Bootstrap, status: &str) -> ObjectId {
        let id = ObjectId::new();

        bootstrap
            .app_state
            .parcel_collection
            .insert_one(
                bson::doc! {
                    "_id": id,
                    "created_by": "a@example.com",
                    "creation_date": "2024-05-01T10:00:00.000Z",
                    "payment_status": status,
                },
                None,
            )
            .await
            .unwrap();

        id
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_confirm_unpaid_parcel() {
        let bootstrap = bootstrap().await;
        let parcel_id = insert_parcel(&bootstrap, "unpaid").await;

        let Json(response) = super::confirm(
            bootstrap.mongo_client(),
            bootstrap.parcel_collection(),
            bootstrap.payment_collection(),
            JsonBody(confirm_request(parcel_id, "a@example.com", "pi_1")),
        )
        .await
        .unwrap();
        assert_eq!(response.message, "Payment confirmed and history saved.");

        let parcel = bootstrap
            .app_state
            .parcel_collection
            .find_one_by_id(parcel_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parcel.get_str("payment_status").unwrap(), PAYMENT_STATUS_PAID);

        let history = bootstrap
            .app_state
            .payment_collection
            .find_sorted(bson::doc! { "parcelId": parcel_id }, bson::doc! {})
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].transaction_id, "pi_1");
        assert_eq!(history[0].currency, "BDT");

        bootstrap.drop_database().await;
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_confirm_paid_parcel_twice() {
        let bootstrap = bootstrap().await;
        let parcel_id = insert_parcel(&bootstrap, "unpaid").await;

        let Json(first) = super::confirm(
            bootstrap.mongo_client(),
            bootstrap.parcel_collection(),
            bootstrap.payment_collection(),
            JsonBody(confirm_request(parcel_id, "a@example.com", "pi_1")),
        )
        .await
        .unwrap();
        assert_eq!(first.message, "Payment confirmed and history saved.");

        let err = super::confirm(
            bootstrap.mongo_client(),
            bootstrap.parcel_collection(),
            bootstrap.payment_collection(),
            JsonBody(confirm_request(parcel_id, "a@example.com", "pi_2")),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::ParcelNotFoundOrPaid);

        let count = bootstrap
            .app_state
            .payment_collection
            .count_documents(bson::doc! { "parcelId": parcel_id }, None)
            .await
            .unwrap();
        assert_eq!(count, 1);

        bootstrap.drop_database().await;
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_concurrent_confirms_pay_once() {
        let bootstrap = bootstrap().await;
        let parcel_id = insert_parcel(&bootstrap, "unpaid").await;

        let (first, second) = tokio::join!(
            super::confirm(
                bootstrap.mongo_client(),
                bootstrap.parcel_collection(),
                bootstrap.payment_collection(),
                JsonBody(confirm_request(parcel_id, "a@example.com", "pi_1")),
            ),
            super::confirm(
                bootstrap.mongo_client(),
                bootstrap.parcel_collection(),
                bootstrap.payment_collection(),
                JsonBody(confirm_request(parcel_id, "a@example.com", "pi_2")),
            ),
        );

        let (confirmed, rejected): (Vec<_>, Vec<_>) =
            [first, second].into_iter().partition(Result::is_ok);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_matches!(rejected[0], Err(Error::ParcelNotFoundOrPaid));

        let count = bootstrap
            .app_state
            .payment_collection
            .count_documents(bson::doc! { "parcelId": parcel_id }, None)
            .await
            .unwrap();
        assert_eq!(count, 1);

        bootstrap.drop_database().await;
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_confirm_missing_parcel() {
        let bootstrap = bootstrap().await;

        let err = super::confirm(
            bootstrap.mongo_client(),
            bootstrap.parcel_collection(),
            bootstrap.payment_collection(),
            JsonBody(confirm_request(ObjectId::new(), "a@example.com", "pi_1")),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::ParcelNotFoundOrPaid);

        let count = bootstrap
            .app_state
            .payment_collection
            .count_documents(None, None)
            .await
            .unwrap();
        assert_eq!(count, 0);

        bootstrap.drop_database().await;
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_history_by_email_newest_first() {
        let bootstrap = bootstrap().await;

        for (email, transaction_id) in [
            ("a@example.com", "pi_1"),
            ("b@example.com", "pi_2"),
            ("a@example.com", "pi_3"),
        ] {
            let parcel_id = insert_parcel(&bootstrap, "unpaid").await;

            let Json(response) = super::confirm(
                bootstrap.mongo_client(),
                bootstrap.parcel_collection(),
                bootstrap.payment_collection(),
                JsonBody(confirm_request(parcel_id, email, transaction_id)),
            )
            .await
            .unwrap();
            assert_eq!(response.message, "Payment confirmed and history saved.");

            // paid_at has millisecond resolution
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let Json(history) = super::index(
            bootstrap.payment_collection(),
            Query(HistoryQuery {
                email: Some("a@example.com".to_string()),
            }),
        )
        .await
        .unwrap();

        let transactions: Vec<_> = history
            .iter()
            .map(|it| it["transactionId"].clone())
            .collect();
        assert_eq!(transactions, vec!["pi_3", "pi_1"]);
        assert!(history.iter().all(|it| it["email"] == "a@example.com"));
        assert!(history[0]["paid_at"].is_string());

        bootstrap.drop_database().await;
    }
}
