// ==========================================
// 批量导入管道 - 命令行入口
// ==========================================
// 子命令: upload / validate / import / history / show / template /
//         recover / stats / record / config / reference
// 输出: JSON（与 API 响应一致）
// ==========================================

use anyhow::{Context, Result};
use bulk_import::api::ImportApi;
use bulk_import::domain::{EntityKind, EntityType, FileFormat, UploadMetadata};
use bulk_import::{logging, VERSION};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "bulk-import")]
#[command(about = "财务实体批量导入（预收款/费用/销售/项目）", version)]
struct Cli {
    /// SQLite 数据库路径（也可由 `BULK_IMPORT_DB_PATH` 指定）
    #[arg(long, env = "BULK_IMPORT_DB_PATH")]
    db: Option<PathBuf>,

    /// 以 JSON 行输出日志
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 解析文件并创建上传会话
    Upload(UploadArgs),
    /// 校验上传会话
    Validate { upload_id: String },
    /// 导入会话中的有效行
    Import {
        upload_id: String,
        /// 校验未通过时仅导入有效行（需配置允许部分导入）
        #[arg(long)]
        accept_partial: bool,
    },
    /// 最近的上传会话
    History {
        #[arg(long)]
        entity: Option<EntityType>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// 会话详情（含错误与警告）
    Show { upload_id: String },
    /// 生成实体的电子表格模板
    Template {
        entity: EntityType,
        #[arg(long, short)]
        output: PathBuf,
    },
    /// 处理进程中断后停留在过渡态的会话
    Recover,
    /// 各类已写入记录的条数
    Stats,
    /// 读取一条已写入记录的某列
    Record {
        /// advance / expense / payable / sale / receivable / project
        kind: EntityKind,
        id: String,
        field: String,
    },
    /// 配置项
    Config(ConfigCommand),
    /// 参照数据（客户/类别）
    Reference(ReferenceCommand),
}

#[derive(Args, Debug)]
struct UploadArgs {
    file: PathBuf,
    #[arg(long)]
    entity: EntityType,
    /// 覆盖由扩展名推断的格式（csv / xlsx / xml）
    #[arg(long)]
    format: Option<FileFormat>,
    #[arg(long)]
    uploaded_by: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args, Debug)]
struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand, Debug)]
enum ConfigSubcommand {
    Set { key: String, value: String },
    Show,
}

#[derive(Args, Debug)]
struct ReferenceCommand {
    #[command(subcommand)]
    command: ReferenceSubcommand,
}

#[derive(Subcommand, Debug)]
enum ReferenceSubcommand {
    AddClient {
        #[arg(long)]
        ruc: String,
        #[arg(long)]
        name: String,
    },
    AddCategory {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
    },
}

/// 默认数据库路径: <data_dir>/bulk-import/bulk_import.db，取不到时使用当前目录
fn default_db_path() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => {
            let dir = data_dir.join("bulk-import");
            std::fs::create_dir_all(&dir).ok();
            dir.join("bulk_import.db")
        }
        None => PathBuf::from("./bulk_import.db"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("无效的文件路径: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    let db_path = cli.db.unwrap_or_else(default_db_path);
    tracing::info!(version = VERSION, db = %db_path.display(), "bulk-import 启动");

    let db_path = db_path
        .to_str()
        .with_context(|| format!("数据库路径不是 UTF-8: {}", db_path.display()))?
        .to_string();
    let api = ImportApi::new(&db_path)?;
    api.apply_locale().await?;

    match cli.command {
        Command::Upload(args) => {
            let bytes = std::fs::read(&args.file)
                .with_context(|| format!("读取文件失败: {}", args.file.display()))?;
            let metadata = UploadMetadata {
                uploaded_by: args.uploaded_by,
                notes: args.notes,
            };
            let response = api
                .upload(bytes, &file_name_of(&args.file)?, args.entity, args.format, Some(metadata))
                .await?;
            print_json(&response)?;
        }
        Command::Validate { upload_id } => print_json(&api.validate(&upload_id).await?)?,
        Command::Import {
            upload_id,
            accept_partial,
        } => print_json(&api.import(&upload_id, accept_partial).await?)?,
        Command::History { entity, limit } => print_json(&api.history(entity, limit).await?)?,
        Command::Show { upload_id } => print_json(&api.get_session(&upload_id).await?)?,
        Command::Template { entity, output } => {
            let bytes = api.template(entity)?;
            std::fs::write(&output, bytes)
                .with_context(|| format!("写入模板失败: {}", output.display()))?;
            tracing::info!(entity = %entity, output = %output.display(), "模板已生成");
        }
        Command::Recover => print_json(&api.recover_interrupted().await?)?,
        Command::Stats => print_json(&api.record_counts()?)?,
        Command::Record { kind, id, field } => print_json(&api.record_field(kind, &id, &field)?)?,
        Command::Config(ConfigCommand { command }) => match command {
            ConfigSubcommand::Set { key, value } => api.set_config(&key, &value)?,
            ConfigSubcommand::Show => print_json(&api.config_snapshot()?)?,
        },
        Command::Reference(ReferenceCommand { command }) => {
            let id = match command {
                ReferenceSubcommand::AddClient { ruc, name } => api.add_client(&ruc, &name)?,
                ReferenceSubcommand::AddCategory { code, name } => api.add_category(&code, &name)?,
            };
            println!("{}", id);
        }
    }

    Ok(())
}
