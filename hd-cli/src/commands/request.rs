//! Request command - issue an arbitrary API call through the client.

use serde_json::Value;

use hd_api::{Method, RequestOptions};
use hd_core::config::ConfigHandle;
use hd_core::error::{HdError, HdResult};

use crate::OutputFormat;

pub async fn run(
    config: ConfigHandle,
    method: &str,
    path: &str,
    body: Option<&str>,
    format: OutputFormat,
) -> HdResult<()> {
    let method = match method.to_uppercase().as_str() {
        "GET" => Method::GET,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "DELETE" => Method::DELETE,
        other => return Err(HdError::Config(format!("unsupported method: {other}"))),
    };
    let body = body.map(serde_json::from_str).transpose()?;

    let api = super::create_api_client(&config).await?;
    let result: HdResult<Value> = api
        .request(method, path, body, RequestOptions::default())
        .await;

    match result {
        Ok(data) => match format {
            OutputFormat::Json => println!("{data}"),
            OutputFormat::Text => println!("{}", serde_json::to_string_pretty(&data)?),
        },
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e);
        }
    }
    Ok(())
}
