//! YDB Document API metadata backend
//!
//! Speaks the DynamoDB-compatible JSON protocol (`X-Amz-Target` operations)
//! against a single table with a `pk` (partition) / `sk` (sort) key schema:
//!
//! | row          | pk                      | sk                  | attributes             |
//! |--------------|-------------------------|---------------------|------------------------|
//! | metadata     | `{buildId}#{key}`       | `metadata`          | `data`, `expires_at`   |
//! | tag index    | `tag#{tag}`             | metadata pk         | `expires_at`           |
//! | path index   | `{path}`                | metadata pk         | `expires_at`           |
//! | claim        | `lock#{buildId}#{key}`  | `lock`              | `token`, `expires_at`  |
//!
//! `expires_at` is the table's TTL attribute (Unix seconds).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::cache::keys::{CLAIM_SORT_KEY, METADATA_SORT_KEY};
use crate::cache::{current_timestamp_ms, EntryMetadata};
use crate::storage::{IndexRow, MetadataStore, StorageError, StorageResult};

const SERVICE: &str = "document-api";
const TARGET_PREFIX: &str = "DynamoDB_20120810";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailedException";

/// Maximum number of write requests in one `BatchWriteItem` call.
pub const MAX_BATCH_WRITE: usize = 25;

/// Retries for rows the service reports as unprocessed.
const UNPROCESSED_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct DocumentApiMetadataStore {
    client: Client,
    endpoint: String,
    table: String,
    token: Option<String>,
}

impl DocumentApiMetadataStore {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        table: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            table: table.into(),
            token,
        }
    }

    /// Sends one protocol operation and returns the decoded JSON body.
    async fn call(&self, operation: &str, payload: Value) -> StorageResult<Value> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .body(serde_json::to_vec(&payload)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(service_error(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn key(&self, pk: &str, sk: &str) -> Value {
        json!({ "pk": { "S": pk }, "sk": { "S": sk } })
    }
}

/// Decodes a protocol error body (`{"__type": "...#Code", "message": "..."}`).
fn service_error(status: u16, body: &str) -> StorageError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let code = parsed
        .get("__type")
        .and_then(Value::as_str)
        .map(|kind| kind.rsplit('#').next().unwrap_or(kind).to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    StorageError::Status {
        service: SERVICE,
        status,
        code,
        message,
    }
}

fn is_conditional_failure(err: &StorageError) -> bool {
    matches!(err, StorageError::Status { code, .. } if code == CONDITIONAL_CHECK_FAILED)
}

fn string_attribute<'a>(item: &'a Value, name: &str) -> Option<&'a str> {
    item.get(name)?.get("S")?.as_str()
}

fn number_attribute(item: &Value, name: &str) -> Option<u64> {
    item.get(name)?.get("N")?.as_str()?.parse().ok()
}

/// Builds the `BatchWriteItem` request list for a chunk of index rows.
fn index_put_requests(rows: &[IndexRow]) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            json!({
                "PutRequest": {
                    "Item": {
                        "pk": { "S": row.partition },
                        "sk": { "S": row.entry },
                        "expires_at": { "N": row.expires_at.to_string() }
                    }
                }
            })
        })
        .collect()
}

fn index_row_from_item(item: &Value) -> StorageResult<IndexRow> {
    let partition = string_attribute(item, "pk")
        .ok_or_else(|| StorageError::Malformed("index row without pk".to_string()))?;
    let entry = string_attribute(item, "sk")
        .ok_or_else(|| StorageError::Malformed("index row without sk".to_string()))?;
    Ok(IndexRow::new(
        partition,
        entry,
        number_attribute(item, "expires_at").unwrap_or(0),
    ))
}

#[async_trait]
impl MetadataStore for DocumentApiMetadataStore {
    async fn get_metadata(&self, partition: &str) -> StorageResult<Option<EntryMetadata>> {
        let response = self
            .call(
                "GetItem",
                json!({
                    "TableName": self.table,
                    "Key": self.key(partition, METADATA_SORT_KEY),
                    "ConsistentRead": true
                }),
            )
            .await?;

        let Some(item) = response.get("Item") else {
            return Ok(None);
        };
        let data = string_attribute(item, "data").ok_or_else(|| {
            StorageError::Malformed(format!("metadata row {partition} has no data"))
        })?;
        Ok(Some(serde_json::from_str(data)?))
    }

    async fn put_metadata(&self, partition: &str, metadata: &EntryMetadata) -> StorageResult<()> {
        let data = serde_json::to_string(metadata)?;
        self.call(
            "PutItem",
            json!({
                "TableName": self.table,
                "Item": {
                    "pk": { "S": partition },
                    "sk": { "S": METADATA_SORT_KEY },
                    "data": { "S": data },
                    "expires_at": { "N": metadata.expires_at.to_string() }
                }
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_metadata(&self, partition: &str) -> StorageResult<bool> {
        let response = self
            .call(
                "DeleteItem",
                json!({
                    "TableName": self.table,
                    "Key": self.key(partition, METADATA_SORT_KEY),
                    "ReturnValues": "ALL_OLD"
                }),
            )
            .await?;
        Ok(response.get("Attributes").is_some())
    }

    async fn put_index_rows(&self, rows: &[IndexRow]) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if rows.len() > MAX_BATCH_WRITE {
            return Err(StorageError::BatchTooLarge {
                size: rows.len(),
                limit: MAX_BATCH_WRITE,
            });
        }

        let mut pending = Value::Array(index_put_requests(rows));
        for attempt in 0..=UNPROCESSED_RETRIES {
            let mut request_items = Map::new();
            request_items.insert(self.table.clone(), pending.clone());
            let response = self
                .call("BatchWriteItem", json!({ "RequestItems": request_items }))
                .await?;

            let unprocessed = response
                .get("UnprocessedItems")
                .and_then(|items| items.get(&self.table))
                .filter(|items| items.as_array().is_some_and(|list| !list.is_empty()))
                .cloned();

            match unprocessed {
                None => return Ok(()),
                Some(items) => {
                    warn!(
                        attempt,
                        remaining = items.as_array().map(Vec::len).unwrap_or(0),
                        "index batch partially processed, retrying"
                    );
                    pending = items;
                    tokio::time::sleep(Duration::from_millis(50 * (u64::from(attempt) + 1))).await;
                }
            }
        }

        Err(StorageError::Unavailable(
            "index batch still unprocessed after retries".to_string(),
        ))
    }

    async fn query_index(&self, partition: &str) -> StorageResult<Vec<IndexRow>> {
        let mut rows = Vec::new();
        let mut start_key: Option<Value> = None;

        loop {
            let mut payload = json!({
                "TableName": self.table,
                "KeyConditionExpression": "pk = :pk",
                "ExpressionAttributeValues": { ":pk": { "S": partition } }
            });
            if let Some(key) = start_key.take() {
                payload["ExclusiveStartKey"] = key;
            }

            let response = self.call("Query", payload).await?;
            if let Some(items) = response.get("Items").and_then(Value::as_array) {
                for item in items {
                    rows.push(index_row_from_item(item)?);
                }
            }

            match response.get("LastEvaluatedKey") {
                Some(key) if !key.is_null() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        debug!(partition, count = rows.len(), "index query finished");
        Ok(rows)
    }

    async fn try_claim(&self, claim: &str, token: &str, ttl: Duration) -> StorageResult<bool> {
        let now_secs = current_timestamp_ms() / 1000;
        let expires_at = now_secs + ttl.as_secs().max(1);

        let result = self
            .call(
                "PutItem",
                json!({
                    "TableName": self.table,
                    "Item": {
                        "pk": { "S": claim },
                        "sk": { "S": CLAIM_SORT_KEY },
                        "token": { "S": token },
                        "expires_at": { "N": expires_at.to_string() }
                    },
                    "ConditionExpression": "attribute_not_exists(pk) OR expires_at < :now",
                    "ExpressionAttributeValues": { ":now": { "N": now_secs.to_string() } }
                }),
            )
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_conditional_failure(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn release_claim(&self, claim: &str, token: &str) -> StorageResult<()> {
        let result = self
            .call(
                "DeleteItem",
                json!({
                    "TableName": self.table,
                    "Key": self.key(claim, CLAIM_SORT_KEY),
                    "ConditionExpression": "#token = :token",
                    "ExpressionAttributeNames": { "#token": "token" },
                    "ExpressionAttributeValues": { ":token": { "S": token } }
                }),
            )
            .await;

        match result {
            // Claim expired and was taken over; nothing of ours to release.
            Err(err) if is_conditional_failure(&err) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    fn name(&self) -> &'static str {
        SERVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    const TABLE: &str = "isr-cache";

    fn store(server: &MockServer) -> DocumentApiMetadataStore {
        DocumentApiMetadataStore::new(
            Client::new(),
            server.base_url(),
            TABLE,
            Some("iam-token".to_string()),
        )
    }

    fn target(operation: &str) -> String {
        format!("{TARGET_PREFIX}.{operation}")
    }

    fn index_item(partition: &str, entry: &str) -> Value {
        json!({ "pk": { "S": partition }, "sk": { "S": entry }, "expires_at": { "N": "42" } })
    }

    #[tokio::test]
    async fn test_get_metadata_without_item_is_none() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST")
                .path("/")
                .header("x-amz-target", target("GetItem"))
                .header("authorization", "Bearer iam-token")
                .json_body_includes(
                    r#"{"TableName":"isr-cache","Key":{"pk":{"S":"b1#/gone"},"sk":{"S":"metadata"}}}"#,
                );
            then.status(200)
                .header("content-type", CONTENT_TYPE)
                .body("{}");
        });

        let found = store(&server).get_metadata("b1#/gone").await.unwrap();

        assert!(found.is_none());
        mock.assert();
    }

    #[tokio::test]
    async fn test_get_metadata_decodes_data_attribute() {
        let metadata = EntryMetadata {
            key: "/blog".to_string(),
            build_id: "b1".to_string(),
            path: Some("/blog".to_string()),
            headers: Default::default(),
            status: 200,
            tags: vec!["posts".to_string()],
            revalidate_after: Some(1_700_000_060_000),
            last_modified: 1_700_000_000_000,
            expires_at: 1_702_592_000,
            blob_key: "cache/b1/ab/abcd".to_string(),
        };
        let server = MockServer::start();
        let item = json!({
            "Item": {
                "pk": { "S": "b1#/blog" },
                "sk": { "S": "metadata" },
                "data": { "S": serde_json::to_string(&metadata).unwrap() },
                "expires_at": { "N": "1702592000" }
            }
        });
        server.mock(|when, then| {
            when.method("POST").header("x-amz-target", target("GetItem"));
            then.status(200).body(item.to_string());
        });

        let found = store(&server).get_metadata("b1#/blog").await.unwrap();

        assert_eq!(found, Some(metadata));
    }

    #[tokio::test]
    async fn test_query_index_follows_last_evaluated_key() {
        let server = MockServer::start();
        // Registered first so the continuation request matches it
        let second_page = server.mock(|when, then| {
            when.method("POST")
                .header("x-amz-target", target("Query"))
                .json_body_includes(
                    r#"{"ExclusiveStartKey":{"pk":{"S":"tag#posts"},"sk":{"S":"b1#/a"}}}"#,
                );
            then.status(200).body(
                json!({ "Items": [index_item("tag#posts", "b2#/b")], "Count": 1 }).to_string(),
            );
        });
        let first_page = server.mock(|when, then| {
            when.method("POST")
                .header("x-amz-target", target("Query"))
                .json_body_includes(
                    r#"{"TableName":"isr-cache","ExpressionAttributeValues":{":pk":{"S":"tag#posts"}}}"#,
                );
            then.status(200).body(
                json!({
                    "Items": [index_item("tag#posts", "b1#/a")],
                    "Count": 1,
                    "LastEvaluatedKey": { "pk": { "S": "tag#posts" }, "sk": { "S": "b1#/a" } }
                })
                .to_string(),
            );
        });

        let rows = store(&server).query_index("tag#posts").await.unwrap();

        assert_eq!(
            rows,
            vec![
                IndexRow::new("tag#posts", "b1#/a", 42),
                IndexRow::new("tag#posts", "b2#/b", 42),
            ]
        );
        first_page.assert_hits(1);
        second_page.assert_hits(1);
    }

    #[tokio::test]
    async fn test_try_claim_held_elsewhere_is_false() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST")
                .header("x-amz-target", target("PutItem"))
                .json_body_includes(r#"{"Item":{"pk":{"S":"lock#b1#/p"},"sk":{"S":"lock"}}}"#);
            then.status(400).body(
                r#"{"__type":"com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException","message":"The conditional request failed"}"#,
            );
        });

        let claimed = store(&server)
            .try_claim("lock#b1#/p", "token-1", Duration::from_secs(30))
            .await
            .unwrap();

        assert!(!claimed);
        mock.assert();
    }

    #[tokio::test]
    async fn test_try_claim_succeeds_and_other_errors_propagate() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("POST").header("x-amz-target", target("PutItem"));
            then.status(200).body("{}");
        });
        let claimed = store(&server)
            .try_claim("lock#b1#/p", "token-1", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(claimed);

        let failing = MockServer::start();
        failing.mock(|when, then| {
            when.method("POST");
            then.status(500).body(r#"{"__type":"InternalServerError","message":"boom"}"#);
        });
        let result = store(&failing)
            .try_claim("lock#b1#/p", "token-1", Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(StorageError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_unprocessed_items_are_retried() {
        let server = MockServer::start();
        let unprocessed = json!({
            "UnprocessedItems": {
                (TABLE): index_put_requests(&[IndexRow::new("tag#b", "b1#/x", 42)])
            }
        });
        let mock = server.mock(|when, then| {
            when.method("POST").header("x-amz-target", target("BatchWriteItem"));
            then.status(200).body(unprocessed.to_string());
        });
        let rows = vec![
            IndexRow::new("tag#a", "b1#/x", 42),
            IndexRow::new("tag#b", "b1#/x", 42),
        ];

        let result = store(&server).put_index_rows(&rows).await;

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        mock.assert_hits(1 + UNPROCESSED_RETRIES as usize);
    }

    #[tokio::test]
    async fn test_fully_processed_batch_is_written_once() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST")
                .header("x-amz-target", target("BatchWriteItem"));
            then.status(200).body(r#"{"UnprocessedItems":{}}"#);
        });

        store(&server)
            .put_index_rows(&[IndexRow::new("tag#a", "b1#/x", 42)])
            .await
            .unwrap();

        mock.assert_hits(1);
    }

    #[test]
    fn test_service_error_strips_type_namespace() {
        let body = r#"{"__type":"com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException","message":"The conditional request failed"}"#;
        let err = service_error(400, body);

        assert!(is_conditional_failure(&err));
        match err {
            StorageError::Status { status, message, .. } => {
                assert_eq!(status, 400);
                assert_eq!(message, "The conditional request failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_service_error_with_non_json_body() {
        let err = service_error(503, "upstream timeout");

        assert!(!is_conditional_failure(&err));
        assert!(err.to_string().contains("upstream timeout"));
    }

    #[test]
    fn test_index_put_requests_shape() {
        let rows = vec![IndexRow::new("tag#posts", "b1#/blog", 1_700_000_000)];
        let requests = index_put_requests(&rows);

        assert_eq!(requests.len(), 1);
        let item = &requests[0]["PutRequest"]["Item"];
        assert_eq!(item["pk"]["S"], "tag#posts");
        assert_eq!(item["sk"]["S"], "b1#/blog");
        assert_eq!(item["expires_at"]["N"], "1700000000");
    }

    #[test]
    fn test_index_row_from_item() {
        let item = json!({
            "pk": { "S": "/blog" },
            "sk": { "S": "b1#/blog" },
            "expires_at": { "N": "42" }
        });

        let row = index_row_from_item(&item).unwrap();
        assert_eq!(row, IndexRow::new("/blog", "b1#/blog", 42));

        let broken = json!({ "pk": { "S": "/blog" } });
        assert!(matches!(
            index_row_from_item(&broken),
            Err(StorageError::Malformed(_))
        ));
    }
}
