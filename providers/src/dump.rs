use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use serde_json::Value;
use storx_backup_lib::{path::dump_object_key, Method, ProcessorError, ProcessorResult};
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    google::required_field,
    processor::{upload_object_and_sync, BaseProcessor, Processor, ProcessorInput, RunReport},
};

const HEARTBEAT_EVERY: Duration = Duration::from_secs(5);

/// SQL database backup: spawn the engine's dump tool, wrap the dump into
/// a `.sql.tar.gz` and upload it as a single object. The password travels
/// via the child's environment, never argv.
pub struct DumpProcessor;

struct DumpTarget {
    engine: &'static str,
    host: String,
    port: String,
    username: String,
    password: String,
    database: String,
}

impl DumpTarget {
    fn from_input(method: Method, input_data: &Value) -> ProcessorResult<Self> {
        let engine = match method {
            Method::PsqlDatabase => "psql",
            Method::MysqlDatabase => "mysql",
            Method::Database => match input_data.get("engine").and_then(Value::as_str) {
                Some("mysql") => "mysql",
                _ => "psql",
            },
            _ => {
                return Err(ProcessorError::Internal(format!(
                    "{method} is not a database method"
                )))
            }
        };
        Ok(Self {
            engine,
            host: required_field(input_data, "host")?,
            port: required_field(input_data, "port")?,
            username: required_field(input_data, "username")?,
            password: required_field(input_data, "password")?,
            database: required_field(input_data, "database_name")?,
        })
    }

    fn command(&self, outfile: &PathBuf) -> Command {
        let mut command = match self.engine {
            "mysql" => {
                let mut c = Command::new("mysqldump");
                c.arg("-h")
                    .arg(&self.host)
                    .arg("-P")
                    .arg(&self.port)
                    .arg("-u")
                    .arg(&self.username)
                    .arg("--result-file")
                    .arg(outfile)
                    .arg(&self.database)
                    .env("MYSQL_PWD", &self.password);
                c
            }
            _ => {
                let mut c = Command::new("pg_dump");
                c.arg("-h")
                    .arg(&self.host)
                    .arg("-p")
                    .arg(&self.port)
                    .arg("-U")
                    .arg(&self.username)
                    .arg("-d")
                    .arg(&self.database)
                    .arg("-f")
                    .arg(outfile)
                    .env("PGPASSWORD", &self.password);
                c
            }
        };
        command.stdout(Stdio::null()).stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl Processor for DumpProcessor {
    async fn run(&self, input: &mut ProcessorInput<'_>) -> ProcessorResult<RunReport> {
        let heartbeat = input.heartbeat.clone();
        heartbeat.beat().await?;

        let target = DumpTarget::from_input(input.method, input.input_data)?;
        let mut base = BaseProcessor::prepare(input).await?;

        // per-task scratch dir, removed on every exit path
        let scratch = PathBuf::from("cache").join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| ProcessorError::Internal(format!("scratch dir: {e}")))?;

        let result = dump_and_upload(input, &heartbeat, &target, &scratch).await;
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            debug!(dir = %scratch.display(), error = %e, "scratch cleanup failed");
        }

        match result {
            Ok(key) => {
                info!(key, "database dump uploaded");
                base.record_success();
                Ok(base.into_report())
            }
            Err(e) => Err(e),
        }
    }
}

async fn dump_and_upload(
    input: &ProcessorInput<'_>,
    heartbeat: &std::sync::Arc<dyn crate::processor::Heartbeat>,
    target: &DumpTarget,
    scratch: &PathBuf,
) -> ProcessorResult<String> {
    let outfile = scratch.join(format!("{}.sql", target.database));
    let mut child = target
        .command(&outfile)
        .spawn()
        .map_err(|e| ProcessorError::Internal(format!("spawn dump: {e}")))?;

    // keep the heartbeat alive while the dump runs
    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.map_err(|e| ProcessorError::Internal(format!("dump wait: {e}")))?;
            }
            _ = tokio::time::sleep(HEARTBEAT_EVERY) => {
                heartbeat.beat().await?;
            }
        }
    };
    if !status.success() {
        let stderr = match child.stderr.take() {
            Some(mut pipe) => {
                use tokio::io::AsyncReadExt;
                let mut buffer = String::new();
                let _ = pipe.read_to_string(&mut buffer).await;
                buffer
            }
            None => String::new(),
        };
        return Err(ProcessorError::Internal(format!(
            "dump exited with {status}: {}",
            stderr.trim()
        )));
    }
    heartbeat.beat().await?;

    // wrap the dump into <dbname>.sql inside a gzipped tarball
    let archive_name = format!("{}.sql", target.database);
    let outfile_clone = outfile.clone();
    let archive = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_path_with_name(&outfile_clone, &archive_name)?;
        builder.into_inner()?.finish()
    })
    .await
    .map_err(|e| ProcessorError::Internal(format!("archive task: {e}")))?
    .map_err(|e| ProcessorError::Internal(format!("archive: {e}")))?;

    let key = dump_object_key(
        target.engine,
        &target.database,
        chrono::Utc::now().timestamp(),
    );
    upload_object_and_sync(
        input.deps,
        input.user_id,
        input.access_grant,
        input.method.bucket(),
        &key,
        archive,
    )
    .await?;
    Ok(key)
}
