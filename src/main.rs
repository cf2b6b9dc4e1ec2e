//! dytvault 命令行入口

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand, ValueEnum};
use dytvault::{
    config::Config,
    domain::{
        address::ensure_recipients,
        crypto_provider::{SecretBytes, SignatureAlgorithm},
        transaction::{
            encode_envelope, ensure_verified, tx_hash, Denom, Msg, SignedEnvelope, Transaction,
        },
    },
    error::{CustodyError, CustodyResult},
    infrastructure::{logging::init_logging, password::Passphrase, shutdown::Shutdown},
    service::{
        batch_builder::{read_batch, validate_job, BatchBuilder},
        chain_client::{AccountStateClient, BroadcastClient, RpcClient},
        custody::Custody,
        session_guard::install_signal_purge,
    },
    utils::error_codes::{ErrorCode, ErrorResponse},
};
use serde::Serialize;
use subtle::ConstantTimeEq;

#[derive(Parser)]
#[command(name = "dytvault")]
#[command(about = "Dytallix key custody and transaction signing", long_about = None, version)]
struct Cli {
    /// TOML 配置文件（优先于环境变量）
    #[arg(long, global = true, env = "DYT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// 从文件读取口令（去掉末尾换行）
    #[arg(long, global = true)]
    passphrase_file: Option<PathBuf>,

    /// 非交互模式：不提示、不重复询问
    #[arg(long, global = true)]
    ci: bool,

    /// 错误提示语言（`--output json` 的 user_message / recovery_hint）
    #[arg(long, global = true, value_enum, env = "DYT_LANG", default_value_t = Lang::En)]
    lang: Lang,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Lang {
    En,
    Zh,
}

impl Lang {
    fn code(self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Zh => "zh",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manage keystore accounts
    Keys {
        #[command(subcommand)]
        cmd: KeysCmd,
    },
    /// Sign, verify and hash transactions
    Tx {
        #[command(subcommand)]
        cmd: TxCmd,
    },
    /// Send tokens from an account
    Transfer {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// DGT (governance) or DRT (reward)
        #[arg(long)]
        denom: String,
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "0")]
        fee: String,
        #[arg(long, default_value = "")]
        memo: String,
        /// 不指定时查询链上 nonce
        #[arg(long)]
        nonce: Option<u64>,
        /// 只签名不广播
        #[arg(long)]
        dry_run: bool,
    },
    /// Build and sign a batch job (path or - for stdin)
    Batch {
        #[arg(long)]
        file: String,
    },
}

#[derive(Subcommand)]
enum KeysCmd {
    /// Create a new account
    New {
        name: String,
        /// dilithium3 | ed25519
        #[arg(long)]
        algo: Option<String>,
    },
    /// Import an existing keypair (base64 files)
    Import {
        name: String,
        #[arg(long)]
        algo: String,
        #[arg(long)]
        secret_file: PathBuf,
        #[arg(long)]
        public_file: PathBuf,
    },
    /// List accounts
    List,
    /// Check a passphrase by unlocking the account
    Unlock { name: String },
    /// Re-encrypt an account under a new passphrase
    ChangePassphrase {
        name: String,
        /// 新口令文件（非交互模式必填）
        #[arg(long)]
        new_passphrase_file: Option<PathBuf>,
    },
    /// Print address and public key
    Export { name: String },
    /// Delete an account (requires its passphrase)
    Delete { name: String },
}

#[derive(Subcommand)]
enum TxCmd {
    /// Sign an unsigned transaction JSON (path or -)
    Sign {
        #[arg(long)]
        from: String,
        #[arg(long)]
        file: String,
        #[arg(long)]
        broadcast: bool,
    },
    /// Verify a signed envelope JSON (path or -)
    Verify {
        #[arg(long)]
        file: String,
    },
    /// Print the hash of a transaction or envelope JSON (path or -)
    Hash {
        #[arg(long)]
        file: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 口令来源
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PassphraseSource {
    file: Option<PathBuf>,
    ci_mode: bool,
}

impl PassphraseSource {
    /// 只有交互提示才允许重复询问
    fn interactive(&self) -> bool {
        self.file.is_none() && !self.ci_mode && std::env::var_os("DYT_PASSPHRASE").is_none()
    }

    fn read(&self, prompt: &str) -> CustodyResult<Passphrase> {
        if let Some(path) = &self.file {
            return Passphrase::from_file(path);
        }
        if let Some(p) = Passphrase::from_env() {
            return Ok(p);
        }
        if self.ci_mode {
            return Err(CustodyError::Config(
                "no passphrase: use --passphrase-file or DYT_PASSPHRASE in CI mode".into(),
            ));
        }
        Passphrase::prompt(prompt)
    }

    /// 新口令：交互模式下要求输入两次
    fn read_new(&self, file: Option<&Path>, prompt: &str) -> CustodyResult<Passphrase> {
        if let Some(path) = file {
            return Passphrase::from_file(path);
        }
        if !self.interactive() {
            return self.read(prompt);
        }
        let first = Passphrase::prompt(prompt)?;
        let second = Passphrase::prompt("Confirm passphrase: ")?;
        if first.as_str().as_bytes().ct_eq(second.as_str().as_bytes()).unwrap_u8() != 1 {
            return Err(CustodyError::Config("passphrases do not match".into()));
        }
        Ok(first)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 输出
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", text()),
    }
    Ok(())
}

fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read {}", source))
    }
}

fn read_b64_file(path: &Path) -> Result<Vec<u8>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    STANDARD
        .decode(raw.trim())
        .with_context(|| format!("{} is not valid base64", path.display()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 命令
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct App {
    custody: Arc<Custody>,
    rpc: Arc<RpcClient>,
    passphrases: PassphraseSource,
    config: Config,
    output: OutputFormat,
}

impl App {
    /// 解锁账户；交互模式下口令错误会重新询问，直到成功或被锁定
    async fn unlock(&self, name: &str) -> CustodyResult<()> {
        loop {
            let passphrase = self.passphrases.read(&format!("Passphrase for {}: ", name))?;
            match self.custody.unlock(name, passphrase.as_str()).await {
                Ok(_) => return Ok(()),
                Err(CustodyError::AuthenticationFailed) if self.passphrases.interactive() => {
                    self.custody.retry_policy().ensure_not_locked_out(name)?;
                    eprintln!(
                        "Wrong passphrase ({} attempts left)",
                        self.custody.retry_policy().remaining_attempts(name)
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn keys(&self, cmd: KeysCmd) -> Result<()> {
        match cmd {
            KeysCmd::New { name, algo } => {
                let algorithm = algo.as_deref().map(SignatureAlgorithm::from_id).transpose()?;
                let passphrase = self.passphrases.read_new(None, "New passphrase: ")?;
                let record =
                    self.custody
                        .create_account(&name, algorithm, passphrase.as_str())?;
                let summary = record.summary();
                emit(self.output, &summary, || {
                    format!("created {} address={} algo={}", summary.name, summary.address, summary.algo)
                })
            }
            KeysCmd::Import {
                name,
                algo,
                secret_file,
                public_file,
            } => {
                let algorithm = SignatureAlgorithm::from_id(&algo)?;
                let secret = SecretBytes::new(read_b64_file(&secret_file)?);
                let public_key = read_b64_file(&public_file)?;
                let passphrase = self.passphrases.read_new(None, "New passphrase: ")?;
                let record = self.custody.keystore().import(
                    &name,
                    algorithm,
                    &public_key,
                    &secret,
                    passphrase.as_str(),
                )?;
                let summary = record.summary();
                emit(self.output, &summary, || {
                    format!("imported {} address={}", summary.name, summary.address)
                })
            }
            KeysCmd::List => {
                let accounts = self.custody.keystore().list()?;
                emit(self.output, &accounts, || {
                    accounts
                        .iter()
                        .map(|a| format!("{}\t{}\t{}\t{}", a.name, a.address, a.algo, a.created_at.to_rfc3339()))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
            KeysCmd::Unlock { name } => {
                self.unlock(&name).await?;
                let state = self.custody.sessions().state(&name);
                emit(self.output, &state, || {
                    format!("{} unlocked (session ends when this process exits)", name)
                })
            }
            KeysCmd::ChangePassphrase {
                name,
                new_passphrase_file,
            } => {
                let old = self
                    .passphrases
                    .read(&format!("Current passphrase for {}: ", name))?;
                let new = self
                    .passphrases
                    .read_new(new_passphrase_file.as_deref(), "New passphrase: ")?;
                self.custody
                    .change_passphrase(&name, old.as_str(), new.as_str())
                    .await?;
                emit(self.output, &serde_json::json!({ "name": name, "changed": true }), || {
                    format!("passphrase changed for {}", name)
                })
            }
            KeysCmd::Export { name } => {
                let export = self.custody.keystore().export_public(&name)?;
                emit(self.output, &export, || {
                    format!("address={}\npubkey_b64={}\nalgo={}", export.address, export.pubkey_b64, export.algo)
                })
            }
            KeysCmd::Delete { name } => {
                let passphrase = self.passphrases.read(&format!("Passphrase for {}: ", name))?;
                self.custody.delete_account(&name, passphrase.as_str()).await?;
                emit(self.output, &serde_json::json!({ "name": name, "deleted": true }), || {
                    format!("deleted {}", name)
                })
            }
        }
    }

    async fn tx(&self, cmd: TxCmd) -> Result<()> {
        match cmd {
            TxCmd::Sign {
                from,
                file,
                broadcast,
            } => {
                let tx = Transaction::from_input_json(&read_input(&file)?)?;
                tx.validate()?;
                ensure_recipients(
                    tx.msgs.iter().map(|m| match m {
                        Msg::Send { to, .. } => to.as_str(),
                    }),
                    &self.config.chain.address_prefix,
                )?;
                self.unlock(&from).await?;
                let envelope = self.custody.sign_transaction(&from, &tx)?;
                self.finish_envelope(envelope, broadcast).await
            }
            TxCmd::Verify { file } => {
                let envelope: SignedEnvelope = serde_json::from_str(&read_input(&file)?)
                    .map_err(|e| CustodyError::EncodingError(e.to_string()))?;
                ensure_verified(&envelope)?;
                emit(self.output, &serde_json::json!({ "valid": true }), || "valid".to_string())
            }
            TxCmd::Hash { file } => {
                let raw = read_input(&file)?;
                let tx = match serde_json::from_str::<SignedEnvelope>(&raw) {
                    Ok(envelope) => envelope.tx,
                    Err(_) => Transaction::from_input_json(&raw)?,
                };
                let hash = tx_hash(&tx)?;
                emit(self.output, &serde_json::json!({ "hash": hash }), || hash.clone())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn transfer(
        &self,
        from: String,
        to: String,
        denom: String,
        amount: String,
        fee: String,
        memo: String,
        nonce: Option<u64>,
        dry_run: bool,
    ) -> Result<()> {
        let denom: Denom = denom
            .parse()
            .map_err(|_| CustodyError::UnsupportedDenom { index: 0, denom })?;
        ensure_recipients([to.as_str()], &self.config.chain.address_prefix)?;

        self.unlock(&from).await?;
        let sender = self.custody.session_address(&from)?;
        let nonce = match nonce {
            Some(n) => n,
            None => self.rpc.account_nonce(&sender).await?,
        };

        let tx = Transaction::new(
            self.config.chain.chain_id.clone(),
            nonce,
            vec![Msg::send(sender, to, denom, amount)],
            fee,
            memo,
        );
        let envelope = self.custody.sign_transaction(&from, &tx)?;
        self.finish_envelope(envelope, !dry_run).await
    }

    async fn finish_envelope(&self, envelope: SignedEnvelope, broadcast: bool) -> Result<()> {
        if broadcast {
            let receipt = self.rpc.submit(&envelope).await.map_err(|e| {
                CustodyError::BroadcastFailed {
                    failed_index: 0,
                    reason: e.to_string(),
                    submitted: vec![],
                    not_submitted: 1,
                }
            })?;
            return emit(self.output, &receipt, || {
                format!("hash={} status={}", receipt.hash, receipt.status)
            });
        }

        let wire = String::from_utf8(encode_envelope(&envelope)?)?;
        emit(self.output, &envelope, || wire)
    }

    async fn batch(&self, file: String) -> Result<()> {
        let job = read_batch(&file)?;
        // 先做纯校验，避免为一个必然失败的批次询问口令
        validate_job(&job)?;
        ensure_recipients(
            job.messages.iter().map(|m| m.to.as_str()),
            &self.config.chain.address_prefix,
        )?;
        self.unlock(&job.from).await?;

        let accounts: Arc<dyn AccountStateClient> = self.rpc.clone();
        let broadcaster: Arc<dyn BroadcastClient> = self.rpc.clone();
        let builder = BatchBuilder::new(
            self.custody.clone(),
            accounts,
            broadcaster,
            self.config.chain.chain_id.clone(),
        );

        let outcome = builder.run(&job).await?;
        emit(self.output, &outcome, || match &outcome.receipts {
            Some(receipts) => receipts
                .iter()
                .map(|r| format!("hash={} status={}", r.hash, r.status))
                .collect::<Vec<_>>()
                .join("\n"),
            None => outcome
                .hashes
                .iter()
                .map(|h| format!("signed_tx hash={}", h))
                .collect::<Vec<_>>()
                .join("\n"),
        })
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env_and_file(cli.config.as_deref())
        .map_err(|e| CustodyError::Config(format!("{:#}", e)))?;
    if cli.ci {
        config.retry.ci_mode = true;
    }
    config
        .validate()
        .map_err(|e| CustodyError::Config(e.to_string()))?;

    // 日志已初始化时忽略
    let _ = init_logging(&config.logging);

    let shutdown = Arc::new(Shutdown::new());
    let custody = Arc::new(Custody::from_config(&config, shutdown.clone())?);
    let reaper = custody.sessions().spawn_reaper();
    let signal_task = install_signal_purge(reaper, shutdown);

    let app = App {
        custody: custody.clone(),
        rpc: Arc::new(RpcClient::new(&config.chain.rpc_url)),
        passphrases: PassphraseSource {
            file: cli.passphrase_file,
            ci_mode: config.retry.ci_mode,
        },
        output: cli.output,
        config,
    };

    let result = match cli.command {
        Commands::Keys { cmd } => app.keys(cmd).await,
        Commands::Tx { cmd } => app.tx(cmd).await,
        Commands::Transfer {
            from,
            to,
            denom,
            amount,
            fee,
            memo,
            nonce,
            dry_run,
        } => {
            app.transfer(from, to, denom, amount, fee, memo, nonce, dry_run)
                .await
        }
        Commands::Batch { file } => app.batch(file).await,
    };

    custody.sessions().purge_all();
    signal_task.abort();
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let output = cli.output;
    let lang = cli.lang;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let custody_error = e.downcast_ref::<CustodyError>();
            let code = custody_error
                .map(CustodyError::exit_code)
                .unwrap_or(ErrorCode::EXIT_GENERIC);

            match (output, custody_error) {
                (OutputFormat::Json, Some(err)) => {
                    let details = serde_json::json!({ "error": err.to_string() });
                    let body = ErrorResponse::new(err.code(), Some(details), lang.code());
                    eprintln!(
                        "{}",
                        serde_json::to_string(&body).unwrap_or_else(|_| err.to_string())
                    );
                }
                _ => eprintln!("error: {:#}", e),
            }
            ExitCode::from(code)
        }
    }
}
