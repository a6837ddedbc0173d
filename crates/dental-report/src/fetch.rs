//! 报告数据获取
//!
//! 从远程 URL 拉取报告 JSON，以及根据返回内容识别报告类型。

use async_trait::async_trait;
use dental_core::{DentalError, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 报告获取接口
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    /// 获取 URL 对应的 JSON 文档
    async fn fetch_json(&self, url: &str) -> Result<Value>;
}

/// 基于 reqwest 的 HTTP 获取器
#[derive(Debug, Clone)]
pub struct HttpReportFetcher {
    client: reqwest::Client,
}

impl HttpReportFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| DentalError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReportFetcher for HttpReportFetcher {
    async fn fetch_json(&self, url: &str) -> Result<Value> {
        debug!("Fetching report JSON from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DentalError::Network(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| DentalError::Network(e.to_string()))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| DentalError::Network(format!("invalid JSON body: {}", e)))
    }
}

/// 拉取 JSON；失败时记录日志并返回 None
pub async fn fetch_json_from_url<F>(fetcher: &F, url: &str) -> Option<Value>
where
    F: ReportFetcher + ?Sized,
{
    match fetcher.fetch_json(url).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Failed to fetch report from {}: {}", url, e);
            None
        }
    }
}

/// 根据图像URL或 report_type 字段识别报告类型，无法识别时默认为 cbct
pub fn detect_report_type(raw: &Value) -> String {
    let places = [
        raw.get("data"),
        raw.get("report"),
        raw.get("fetchedData"),
        Some(raw),
    ];

    for place in places.into_iter().flatten() {
        if !place.is_object() {
            continue;
        }
        if has_text(place, "pano_image_url") {
            info!("Report type detected: pano (pano_image_url)");
            return "pano".to_string();
        }
        if has_text(place, "cbct_image_url") {
            info!("Report type detected: cbct (cbct_image_url)");
            return "cbct".to_string();
        }
        if let Some(kind) = place.get("report_type").and_then(Value::as_str) {
            if !kind.is_empty() {
                let kind = kind.to_lowercase();
                info!("Report type detected: {} (report_type)", kind);
                return kind;
            }
        }
    }

    warn!("Unable to detect report type, using default: cbct");
    "cbct".to_string()
}

fn has_text(value: &Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}
