//! Login/logout - manage the stored auth token.

use hd_api::TokenStore;
use hd_core::config::ConfigHandle;
use hd_core::error::HdResult;

/// Store the auth token for subsequent requests.
pub async fn login(config: ConfigHandle, token: &str) -> HdResult<()> {
    let store = super::open_store(&config).await?;
    let tokens = TokenStore::new(store);
    tokens.set(token).await?;
    println!("Token stored.");
    Ok(())
}

/// Clear the stored auth token and cancel any in-flight requests.
pub async fn logout(config: ConfigHandle) -> HdResult<()> {
    let store = super::open_store(&config).await?;
    let tokens = TokenStore::new(store);
    tokens.clear().await?;
    println!("Signed out.");
    Ok(())
}
