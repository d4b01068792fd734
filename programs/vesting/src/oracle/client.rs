use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{MintRegistry, ScheduleSource, StorageVersion};
use crate::config::VestingConfig;
use crate::constants::{MINT_STORAGE_PATH, NEVER_CHANGED, VESTING_STORAGE_PATH};
use crate::error::OracleError;
use crate::state::{Address, RawScheduleRecord, VestingSchedule};
use crate::utils::time;

#[derive(Debug, Deserialize)]
struct VestingStorageDoc {
    #[serde(default)]
    data: Option<VestingAddresses>,
}

#[derive(Debug, Deserialize)]
struct VestingAddresses {
    #[serde(default, rename = "vestingAddresses")]
    vesting_addresses: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct MintStorageDoc {
    #[serde(default)]
    data: Option<Mints>,
}

#[derive(Debug, Deserialize)]
struct Mints {
    #[serde(default)]
    mints: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct StorageSummaryDoc {
    #[serde(default, rename = "mintStorageEntries")]
    mint_storage_entries: Option<StorageSummary>,
}

#[derive(Debug, Deserialize)]
struct StorageSummary {
    #[serde(default, rename = "vestingStorageEntries")]
    vesting_storage_entries: Option<StorageStamp>,
}

#[derive(Debug, Deserialize)]
struct StorageStamp {
    #[serde(default, rename = "lastchanged", alias = "lastChanged")]
    last_changed: Option<String>,
}

/// HTTP client for the schedule oracle.
///
/// Non-2xx answers and empty bodies degrade to "no data" with a warning;
/// transport failures and timeouts are returned so the caller can keep its
/// previous state.
#[derive(Debug, Clone)]
pub struct OracleClient {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl OracleClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, OracleError> {
        let base = base_url.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(OracleError::InvalidUrl(base_url.to_owned()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| OracleError::Unreachable(e.to_string()))?;
        Ok(Self {
            http,
            base: base.to_owned(),
            timeout,
        })
    }

    pub fn from_config(config: &VestingConfig) -> Result<Self, OracleError> {
        Self::new(
            &config.oracle_url,
            config.request_timeout(),
            config.accept_invalid_certs,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Address -> raw record, decoration already stripped. Records that are
    /// not even JSON objects of the expected shape are skipped. `None` when
    /// the oracle answered with an error status or an empty body.
    pub async fn fetch_raw(
        &self,
    ) -> Result<Option<BTreeMap<Address, RawScheduleRecord>>, OracleError> {
        let url = format!("{}/{}", self.base, VESTING_STORAGE_PATH);
        let Some(doc) = self.get_json::<VestingStorageDoc>(&url).await? else {
            return Ok(None);
        };
        let entries = doc
            .data
            .and_then(|d| d.vesting_addresses)
            .unwrap_or_default();

        let mut out = BTreeMap::new();
        for (key, value) in entries {
            let address = Address::from_wrapped(&key);
            match serde_json::from_value::<RawScheduleRecord>(value) {
                Ok(record) => {
                    if out.insert(address.clone(), record).is_some() {
                        warn!(address = %address, "duplicate oracle key, keeping the last one");
                    }
                }
                Err(e) => warn!(address = %address, error = %e, "skipping malformed oracle record"),
            }
        }
        Ok(Some(out))
    }

    /// `true` if any key of the minting list contains `address`.
    pub async fn check_minting(&self, address: &Address) -> Result<bool, OracleError> {
        let url = format!("{}/{}/{}", self.base, MINT_STORAGE_PATH, address);
        let Some(doc) = self.get_json::<MintStorageDoc>(&url).await? else {
            return Ok(false);
        };
        let listed = doc
            .data
            .and_then(|d| d.mints)
            .is_some_and(|mints| mints.keys().any(|k| k.contains(address.as_str())));
        Ok(listed)
    }

    pub async fn last_changed(&self) -> Result<StorageVersion, OracleError> {
        let Some(doc) = self.get_json::<StorageSummaryDoc>(&self.base).await? else {
            return Ok(StorageVersion::Unknown);
        };
        let stamp = doc
            .mint_storage_entries
            .and_then(|s| s.vesting_storage_entries)
            .and_then(|v| v.last_changed);
        Ok(match stamp.as_deref() {
            None => StorageVersion::Unknown,
            Some(NEVER_CHANGED) => StorageVersion::Never,
            Some(s) => match time::parse_instant(s) {
                Ok(t) => StorageVersion::At(t),
                Err(e) => {
                    warn!(value = s, error = %e, "unparsable lastchanged stamp");
                    StorageVersion::Unknown
                }
            },
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, OracleError> {
        let response = self.http.get(url).send().await.map_err(|e| self.transport(e))?;
        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "oracle answered with non-success status");
            return Ok(None);
        }
        let body = response.bytes().await.map_err(|e| self.transport(e))?;
        if body.is_empty() {
            warn!(url, "received empty response from oracle");
            return Ok(None);
        }
        debug!(url, bytes = body.len(), "oracle response");
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| OracleError::Decode(e.to_string()))
    }

    fn transport(&self, e: reqwest::Error) -> OracleError {
        if e.is_timeout() {
            OracleError::Timeout(self.timeout)
        } else {
            OracleError::Unreachable(e.to_string())
        }
    }
}

#[async_trait]
impl ScheduleSource for OracleClient {
    async fn fetch_schedules(
        &self,
    ) -> Result<Option<BTreeMap<Address, VestingSchedule>>, OracleError> {
        let Some(raw) = self.fetch_raw().await? else {
            return Ok(None);
        };
        let mut schedules = BTreeMap::new();
        for (address, record) in raw {
            match record.into_schedule(address.clone()) {
                Ok(s) => {
                    schedules.insert(address, s);
                }
                Err(e) => warn!(error = %e, "skipping invalid schedule record"),
            }
        }
        Ok(Some(schedules))
    }

    async fn storage_version(&self) -> Result<StorageVersion, OracleError> {
        self.last_changed().await
    }
}

#[async_trait]
impl MintRegistry for OracleClient {
    async fn is_minting(&self, address: &Address) -> Result<bool, OracleError> {
        self.check_minting(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};

    const VESTING_DOC: &str = r#"{
        "timeStamp":"2023-08-30T12:44:21.659Z",
        "type":"VESTING_STORAGE",
        "data":{"vestingAddresses":{
            "Address(wif=unigrid1k3xsk7muy8738hteg94de6ynde0v0af9tgptx0)":
                {"amount":1000000,"start":"2023-08-29T16:53:46Z","duration":"PT3H","parts":5,"block":40,"percent":3,"cliff":1},
            "Address(wif=unigrid16vyxrtjarguun728vg0fuxs847sh5vls38cfss)":
                {"amount":"2000","start":"2023-08-29T16:53:46Z","duration":"PT168H29M58S","parts":"7","block":7},
            "Address(wif=unigrid1broken)":
                {"amount":10,"start":"2023-08-29T16:53:46Z","duration":"three hours","parts":2},
            "Address(wif=unigrid1notanobject)": 42
        }},
        "signature":"MIGIAkIBZxo"
    }"#;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/gridspork")
    }

    fn client(base: &str) -> OracleClient {
        OracleClient::new(base, Duration::from_secs(2), true).unwrap()
    }

    #[tokio::test]
    async fn fetches_and_strips_addresses() {
        let base = serve(Router::new().route("/gridspork/vesting-storage", get(|| async { VESTING_DOC }))).await;
        let c = client(&base);

        let raw = c.fetch_raw().await.unwrap().unwrap();
        assert_eq!(raw.len(), 3);
        assert!(raw.keys().all(|a| !a.as_str().starts_with("Address(")));

        let schedules = c.fetch_schedules().await.unwrap().unwrap();
        assert_eq!(schedules.len(), 2);
        let s = &schedules[&Address::new("unigrid1k3xsk7muy8738hteg94de6ynde0v0af9tgptx0")];
        assert_eq!(s.total_amount, 1_000_000);
        assert_eq!(s.duration, Duration::from_secs(3 * 3600));
        assert_eq!((s.parts_count, s.activation_block, s.tge_percent, s.cliff_parts), (5, 40, 3, 1));
        let loose = &schedules[&Address::new("unigrid16vyxrtjarguun728vg0fuxs847sh5vls38cfss")];
        assert_eq!((loose.total_amount, loose.parts_count, loose.activation_block), (2000, 7, 7));
    }

    #[tokio::test]
    async fn non_success_and_empty_bodies_yield_no_document() {
        let base = serve(
            Router::new()
                .route("/gridspork/vesting-storage", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
                .route("/gridspork/mint-storage/:addr", get(|| async { "" })),
        )
        .await;
        let c = client(&base);
        assert!(c.fetch_schedules().await.unwrap().is_none());
        assert!(!c.check_minting(&Address::new("a")).await.unwrap());
    }

    #[tokio::test]
    async fn garbage_body_is_a_decode_error() {
        let base = serve(Router::new().route("/gridspork/vesting-storage", get(|| async { "<html>" }))).await;
        assert!(matches!(
            client(&base).fetch_schedules().await,
            Err(OracleError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_oracle_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let c = client(&format!("http://{addr}/gridspork"));
        assert!(matches!(c.fetch_schedules().await, Err(OracleError::Unreachable(_))));
    }

    #[tokio::test]
    async fn slow_oracle_times_out() {
        let base = serve(Router::new().route(
            "/gridspork/vesting-storage",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        ))
        .await;
        let c = OracleClient::new(&base, Duration::from_millis(100), true).unwrap();
        assert!(matches!(c.fetch_schedules().await, Err(OracleError::Timeout(_))));
    }

    #[tokio::test]
    async fn minting_list_matches_by_substring() {
        let base = serve(Router::new().route(
            "/gridspork/mint-storage/:addr",
            get(|| async {
                r#"{"data":{"mints":{"Address(wif=unigrid1minter),1":100}},"previousData":{}}"#
            }),
        ))
        .await;
        let c = client(&base);
        assert!(c.check_minting(&Address::new("unigrid1minter")).await.unwrap());
        assert!(!c.check_minting(&Address::new("unigrid1other")).await.unwrap());
    }

    #[tokio::test]
    async fn reads_storage_version() {
        let base = serve(
            Router::new().route(
                "/gridspork",
                get(|| async {
                    r#"{"mintStorageEntries":{"vestingStorageEntries":{"amount":"2","lastchanged":"2023-08-30T12:44:21Z"}}}"#
                }),
            ),
        )
        .await;
        let v = client(&base).last_changed().await.unwrap();
        assert_eq!(
            v,
            StorageVersion::At(time::parse_instant("2023-08-30T12:44:21Z").unwrap())
        );

        let never = serve(Router::new().route(
            "/gridspork",
            get(|| async { r#"{"mintStorageEntries":{"vestingStorageEntries":{"lastchanged":"never"}}}"# }),
        ))
        .await;
        assert_eq!(client(&never).last_changed().await.unwrap(), StorageVersion::Never);
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            OracleClient::new("ftp://oracle", Duration::from_secs(1), true),
            Err(OracleError::InvalidUrl(_))
        ));
        let c = OracleClient::new("https://oracle.example/gridspork/", Duration::from_secs(1), false).unwrap();
        assert_eq!(c.base_url(), "https://oracle.example/gridspork");
    }
}
