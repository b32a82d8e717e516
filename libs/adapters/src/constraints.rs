//! Pre-flight attachment checks applied before any bytes leave the process.

use crate::errors::SendError;

/// Rejects attachments whose URL extension is outside the platform's
/// allow-list, and (when the host reports one) whose size exceeds the
/// platform cap.
pub async fn enforce_attachment_limits(
    client: &reqwest::Client,
    url: &str,
    allowed_extensions: &[&str],
    max_bytes: u64,
) -> Result<(), SendError> {
    let extension = url
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.split(['?', '#']).next().unwrap_or(ext).to_ascii_lowercase())
        .unwrap_or_default();
    if !allowed_extensions.contains(&extension.as_str()) {
        return Err(SendError::permanent(
            "unsupported_attachment_type",
            format!("attachment extension `{extension}` is not accepted by this platform"),
        ));
    }

    // mock:// attachments are used by offline tests; nothing to probe.
    if url.starts_with("mock://") {
        return Ok(());
    }

    let response = client.head(url).send().await.map_err(|err| {
        SendError::retryable("attachment_probe", "failed to probe attachment size", None)
            .with_source(err)
    })?;
    if let Some(length) = response.content_length()
        && length > max_bytes
    {
        return Err(SendError::permanent(
            "attachment_too_large",
            format!("attachment is {length} bytes, platform limit is {max_bytes}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_disallowed_extension() {
        let client = reqwest::Client::new();
        let err = enforce_attachment_limits(&client, "mock://cdn/file.exe", &["jpg", "png"], 1024)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_attachment_type");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn accepts_allowed_mock_attachment_without_probe() {
        let client = reqwest::Client::new();
        assert!(
            enforce_attachment_limits(&client, "mock://cdn/photo.jpg", &["jpg", "png"], 1024)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn extension_check_ignores_query_strings() {
        let client = reqwest::Client::new();
        assert!(
            enforce_attachment_limits(&client, "mock://cdn/photo.png?w=200", &["jpg", "png"], 1024)
                .await
                .is_ok()
        );
    }
}
