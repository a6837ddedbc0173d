//! 牙科报告外壳主程序
//!
//! 每次运行打开一个报告会话（内存或文件会话存储），执行一条命令并以 JSON 输出结果。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dental_admin::{init_logging, ConfigManager, LogLevel, ShellConfig, StorageBackend};
use dental_core::View;
use dental_report::{
    detect_report_type, FileStorage, HttpReportFetcher, LoadStatus, MemoryStorage,
    ReportDataStore, SessionStorage, StoreOptions,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "dental-shell")]
#[command(about = "Dental report session shell")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别（覆盖配置文件）
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// 继续已有的文件会话
    #[arg(short, long)]
    session: Option<Uuid>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 从本地 JSON 文件加载报告
    Load { file: PathBuf },
    /// 从 URL 获取并加载报告
    Fetch { url: String },
    /// 数据状态与校验结果
    Status,
    /// 牙齿切片范围
    Slices {
        #[arg(long)]
        tooth: Option<u32>,
        #[arg(long)]
        view: Option<String>,
    },
    /// 某平面的切片边界
    Boundaries { view: String },
    /// 查找包含某切片的牙齿
    Find {
        #[arg(long)]
        slice: u32,
        #[arg(long)]
        view: String,
    },
    /// 为牙齿标注切片
    Tag {
        #[arg(long)]
        tooth: u32,
        #[arg(long)]
        view: View,
        #[arg(long)]
        slice: u32,
    },
    /// 切片范围与问题统计
    Stats,
    /// 设置报告结论
    Conclude { text: String },
    /// 导出当前文档
    Export,
    /// 结束会话并删除快照
    End,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(args.config.as_deref())?;
    let mut config = manager.config().clone();
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // 初始化日志
    init_logging(&config.logging)?;

    let storage = open_storage(&config, args.session)?;
    let options = StoreOptions {
        storage_key: config.storage.key.clone(),
        history_limit: config.history.limit,
    };
    let mut store = ReportDataStore::open(storage, options);

    let output = run(&mut store, &config, args.command).await?;
    if let Some(output) = output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(())
}

fn open_storage(config: &ShellConfig, session: Option<Uuid>) -> Result<Box<dyn SessionStorage>> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Box::new(MemoryStorage::new())),
        StorageBackend::File => {
            let base = config
                .storage
                .directory
                .as_ref()
                .context("file storage requires storage.directory")?;

            let storage = match session {
                Some(id) => FileStorage::open_session(base, id),
                None => {
                    let (id, storage) = FileStorage::new_session(base)?;
                    eprintln!("session: {}", id);
                    storage
                }
            };
            Ok(Box::new(storage))
        }
    }
}

async fn run(store: &mut ReportDataStore, config: &ShellConfig, command: Command) -> Result<Option<Value>> {
    let output = match command {
        Command::Load { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let raw: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            Some(load_raw(store, &raw)?)
        }
        Command::Fetch { url } => {
            let fetcher = HttpReportFetcher::new(
                Duration::from_secs(config.fetch.timeout_secs),
                &config.fetch.user_agent,
            )?;
            match store.load_from_url(&fetcher, &url).await {
                Some(result) => {
                    let status = result?;
                    Some(json!({ "status": load_label(status), "dataStatus": to_json(&store.data_status())? }))
                }
                None => {
                    warn!("No report loaded from {}", url);
                    Some(json!({ "status": "unchanged" }))
                }
            }
        }
        Command::Status => Some(json!({
            "dataStatus": to_json(&store.data_status())?,
            "validation": to_json(&store.validate_data())?,
            "reportType": store.report_type(),
            "currentReportId": store.current_report_id(),
        })),
        Command::Slices { tooth, view } => match tooth {
            Some(number) => Some(to_json(&store.tooth_slice_ranges(number, view.as_deref()))?),
            None => Some(to_json(&store.all_teeth_slice_ranges(view.as_deref()))?),
        },
        Command::Boundaries { view } => Some(to_json(&store.view_slice_boundaries(&view))?),
        Command::Find { slice, view } => Some(to_json(&store.find_teeth_in_slice(slice, &view))?),
        Command::Tag { tooth, view, slice } => {
            store.add_tooth_slice(tooth, view, slice);
            Some(to_json(&store.tooth_view_slices(tooth, view))?)
        }
        Command::Stats => Some(json!({
            "sliceRanges": to_json(&store.slice_ranges_statistics())?,
            "problems": to_json(&store.problem_statistics())?,
        })),
        Command::Conclude { text } => {
            store.set_conclusion(text);
            Some(json!({
                "conclusion": store.conclusion(),
                "conclusionUpdatedAt": store.conclusion_updated_at(),
            }))
        }
        Command::Export => Some(store.export_json()?),
        Command::End => {
            let session = std::mem::replace(store, ReportDataStore::in_memory());
            session.end_session()?;
            info!("Session closed");
            None
        }
    };

    Ok(output)
}

/// 上游响应可能把报告包在 `data` 或 `report` 字段里
fn select_report_payload(raw: &Value) -> &Value {
    ["data", "report"]
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| value.is_object())
        .unwrap_or(raw)
}

fn load_raw(store: &mut ReportDataStore, raw: &Value) -> Result<Value> {
    let status = store.load_patient_data(select_report_payload(raw))?;

    if status == LoadStatus::Loaded && store.report_type().is_empty() {
        store.set_report_type(detect_report_type(raw));
    }

    Ok(json!({
        "status": load_label(status),
        "reportType": store.report_type(),
        "dataStatus": to_json(&store.data_status())?,
    }))
}

fn load_label(status: LoadStatus) -> &'static str {
    match status {
        LoadStatus::Loaded => "loaded",
        LoadStatus::Skipped => "skipped",
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_report_payload() {
        let wrapped = json!({ "data": { "patientInfo": { "patientId": "P1" } } });
        assert_eq!(select_report_payload(&wrapped)["patientInfo"]["patientId"], "P1");

        let nested = json!({ "report": { "patientId": "P2" }, "data": null });
        assert_eq!(select_report_payload(&nested)["patientId"], "P2");

        let bare = json!({ "patientInfo": { "patientId": "P3" } });
        assert_eq!(select_report_payload(&bare), &bare);
    }

    #[test]
    fn test_load_raw_detects_report_type() {
        let mut store = ReportDataStore::in_memory();
        let raw = json!({
            "pano_image_url": "https://images/p1.png",
            "data": { "patientInfo": { "patientId": "P1" } }
        });

        let output = load_raw(&mut store, &raw).unwrap();
        assert_eq!(output["status"], "loaded");
        assert_eq!(output["reportType"], "pano");
        assert!(store.is_pano());

        let again = load_raw(&mut store, &raw).unwrap();
        assert_eq!(again["status"], "skipped");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "dental-shell", "--log-level", "debug", "find", "--slice", "7", "--view", "axial",
        ])
        .unwrap();
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(matches!(args.command, Command::Find { slice: 7, .. }));

        let args = Args::try_parse_from([
            "dental-shell", "tag", "--tooth", "11", "--view", "Coronal", "--slice", "3",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Tag { view: View::Coronal, .. }));
    }

    #[tokio::test]
    async fn test_run_status_on_empty_session() {
        let mut store = ReportDataStore::in_memory();
        let config = ShellConfig::default();
        let output = run(&mut store, &config, Command::Status).await.unwrap().unwrap();
        assert_eq!(output["dataStatus"]["hasData"], false);
        assert_eq!(output["validation"]["isValid"], false);
    }
}
