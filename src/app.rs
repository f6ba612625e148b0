use std::sync::Arc;

use axum::{extract::FromRef, http::Uri, routing, Router};
use mongodb::options::{ClientOptions, Credential, ServerApi, ServerApiVersion};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    api::{
        parcels::ParcelCollection, payments::PaymentCollection, tracking::TrackingCollection,
        users::UserCollection,
    },
    config::{Config, MongoSource},
    error::Error,
    gateway::{SharedGateway, StripeGateway},
    migrate::MigrationCollection,
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub mongo_client: mongodb::Client,
    pub gateway: SharedGateway,

    pub user_collection: UserCollection,
    pub parcel_collection: ParcelCollection,
    pub tracking_collection: TrackingCollection,
    pub payment_collection: PaymentCollection,
    pub migrate_collection: MigrationCollection,
}

impl AppState {
    pub fn new(mongo_client: mongodb::Client, database_name: &str, gateway: SharedGateway) -> Self {
        let db = mongo_client.database(database_name);

        Self {
            mongo_client,
            gateway,

            user_collection: UserCollection(db.collection("users").into()),
            parcel_collection: ParcelCollection(db.collection("parcels").into()),
            tracking_collection: TrackingCollection(db.collection("parcelTracking").into()),
            payment_collection: PaymentCollection(db.collection("paymentHistory").into()),
            migrate_collection: MigrationCollection(db.collection("migrations").into()),
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self, mongodb::error::Error> {
        let mongo_client = connect(&config.mongo).await?;
        let gateway = Arc::new(StripeGateway::new(
            config.gateway_url.clone(),
            config.gateway_key.clone(),
        ));

        Ok(Self::new(mongo_client, &config.database_name, gateway))
    }

    pub async fn ping(&self) -> Result<(), mongodb::error::Error> {
        self.mongo_client
            .database("admin")
            .run_command(bson::doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
    }
}

async fn connect(source: &MongoSource) -> Result<mongodb::Client, mongodb::error::Error> {
    let mut options = match source {
        MongoSource::Uri(uri) => ClientOptions::parse(uri).await?,
        MongoSource::Atlas {
            user,
            password,
            host,
        } => {
            let mut options = ClientOptions::parse(format!(
                "mongodb+srv://{host}/?retryWrites=true&w=majority&appName=Cluster0"
            ))
            .await?;
            options.credential = Some(
                Credential::builder()
                    .username(user.clone())
                    .password(password.clone())
                    .build(),
            );
            options
        }
    };

    options.server_api = Some(
        ServerApi::builder()
            .version(ServerApiVersion::V1)
            .strict(true)
            .deprecation_errors(true)
            .build(),
    );

    mongodb::Client::with_options(options)
}

pub async fn status() -> &'static str {
    "Profast parcel delivery Server is running!"
}

pub async fn fallback(uri: Uri) -> Error {
    Error::NotFound(uri)
}

pub fn router(state: AppState) -> Router {
    use crate::api::{parcels, payments, tracking, users};

    Router::new()
        .route("/", routing::get(status))
        .route("/users", routing::post(users::register))
        .route("/parcels", routing::get(parcels::index).post(parcels::create))
        .route(
            "/parcels/:id",
            routing::get(parcels::show).delete(parcels::delete),
        )
        .route("/parcel-tracking", routing::post(tracking::create))
        .route("/payments", routing::get(payments::index))
        .route("/payments/confirm", routing::post(payments::confirm))
        .route("/create-payment", routing::post(payments::create_intent))
        .fallback(fallback)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
