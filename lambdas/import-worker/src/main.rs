use aws_lambda_events::event::s3::{S3Event, S3EventRecord};
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sesv2::Client as SesClient;
use kla_shared::imports::{job::parse_source_key, run_import};
use kla_shared::{config::Config, AppState};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = Config::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;

    let aws = aws_config::load_from_env().await;
    let state = AppState::new(
        config,
        CognitoClient::new(&aws),
        DynamoClient::new(&aws),
        S3Client::new(&aws),
        SesClient::new(&aws),
    );

    run(service_fn(move |event: LambdaEvent<S3Event>| {
        let state = Arc::clone(&state);
        async move { function_handler(event, &state).await }
    }))
    .await
}

async fn function_handler(event: LambdaEvent<S3Event>, state: &AppState) -> Result<(), Error> {
    tracing::info!("S3 event received with {} records", event.payload.records.len());

    // A failed record is logged and left on its job; the rest of the batch still runs
    for record in &event.payload.records {
        if let Err(e) = process_record(record, state).await {
            tracing::error!("Failed to process record: {}", e);
        }
    }

    Ok(())
}

async fn process_record(record: &S3EventRecord, state: &AppState) -> Result<(), Error> {
    let raw_key = record.s3.object.key.as_deref().ok_or("Missing object key")?;
    let key = decode_object_key(raw_key);

    let Some((kind, job_id)) = parse_source_key(&key) else {
        tracing::info!("Ignoring object {}", key);
        return Ok(());
    };

    tracing::info!("Running {} import {}", kind.slug(), job_id);
    let job = run_import(state, kind, &job_id).await?;
    tracing::info!(
        "Import {} finished {:?}: {}",
        job.id,
        job.status,
        job.message.as_deref().unwrap_or("")
    );
    Ok(())
}

/// S3 notifications carry keys form-encoded: `+` for spaces, `%XX` escapes.
fn decode_object_key(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
