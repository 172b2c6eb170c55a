// Read-only transport: one snapshot fetch, no updates in either direction.

use super::{fetch_init, Opened, TransportContext, TransportHandle, TransportKind};
use crate::error::ConnectionError;

pub async fn open(
    client: &reqwest::Client,
    url: &url::Url,
    ctx: TransportContext,
) -> Result<Opened, ConnectionError> {
    let handshake = fetch_init(client, url, &ctx).await?;
    Ok(Opened { handle: TransportHandle::detached(TransportKind::ReadOnly), handshake })
}
