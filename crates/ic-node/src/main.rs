//! ic-node - interconnection handshake and negotiated algorithm runtime
//!
//! Each party runs this binary once; the cohort negotiates a single
//! parameter set over a reliable mesh transport before either algorithm
//! (ECDH-PSI or SS-LR) begins.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use ic_core::context::{LrContext, PsiContext};
use ic_node::config::{AlgoKind, Config};
use ic_node::handlers::lr::LrHandler;
use ic_node::handlers::psi::PsiHandler;
use ic_node::state_machine::{run_handshake, AlgoHandler, NegotiatedContext};
use ic_node::{csv_io, runtime};
use ic_transport::{MeshTransport, TcpMeshTransport};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("configuration error: {0}")]
    Config(#[from] ic_node::config::ConfigError),
    #[error("dataset error: {0}")]
    Dataset(#[from] csv_io::DatasetError),
    #[error("transport error: {0}")]
    Transport(#[from] ic_transport::TransportError),
    #[error("handshake error: {0}")]
    Handshake(#[from] ic_node::state_machine::RunError),
    #[error("runtime error: {0}")]
    Runtime(#[from] runtime::RuntimeError),
    #[error("missing --in_path for ECDH_PSI")]
    MissingInPath,
    #[error("missing --dataset for SS_LR")]
    MissingDataset,
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid configuration: {0}")]
    Validate(#[from] anyhow::Error),
    #[error("precheck_input: duplicate item {0:?} in dataset")]
    DuplicatePsiItem(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let env_filter = EnvFilter::from_default_env().add_directive("ic_node=info".parse().unwrap());
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    }

    info!("ic-node v{} rank {}", env!("CARGO_PKG_VERSION"), config.rank);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "ic-node failed");
            ExitCode::from(255) // -1
        }
    }
}

async fn run(config: Config) -> Result<(), MainError> {
    config.validate()?;
    let addrs = config.party_addrs()?;
    let world_size = config.world_size() as i32;
    let transport = TcpMeshTransport::connect(config.rank, &addrs).await?;

    match config.algo()? {
        AlgoKind::EcdhPsi => run_psi(&config, world_size, transport.as_ref()).await,
        AlgoKind::SsLr => run_lr(&config, world_size, transport.as_ref()).await,
    }
}

async fn run_psi(config: &Config, world_size: i32, transport: &dyn MeshTransport) -> Result<(), MainError> {
    let in_path = config.in_path.as_deref().ok_or(MainError::MissingInPath)?;
    let items = load_psi_items(in_path, &config.field_names, config.should_sort)?;
    if config.precheck_input {
        precheck_psi_items(&items)?;
    }

    let handler = PsiHandler::from_config(config, items.len() as i64)?;

    let ctx: PsiContext = if config.disable_handshake {
        PsiContext {
            suite: handler.suite,
            point_octet_format: handler.point_octet_format,
            bit_length_after_truncated: -1,
            item_num: handler.item_num,
            result_to_rank: handler.result_to_rank,
            local_rank: handler.local_rank,
        }
    } else {
        let algo = AlgoHandler::Psi(handler);
        match run_handshake(transport, world_size, &algo).await? {
            NegotiatedContext::Psi(ctx) => ctx,
            NegotiatedContext::Lr(_) => unreachable!("PSI handler always yields a PsiContext"),
        }
    };

    let out_path = config.storage_override("runtime.component.output.train_data").or_else(|| config.out_path.clone());
    runtime::run_psi(transport, world_size, &ctx, &items, out_path.as_deref()).await?;
    Ok(())
}

async fn run_lr(config: &Config, world_size: i32, transport: &dyn MeshTransport) -> Result<(), MainError> {
    let dataset_path = config.dataset.as_deref().ok_or(MainError::MissingDataset)?;
    let dataset = csv_io::load_lr_dataset(dataset_path, config.skip_rows, config.has_label)?;

    let handler = LrHandler::from_config(config, dataset.sample_size, dataset.feature_num)?;

    let ctx: LrContext = if config.disable_handshake {
        context_from_local_proposal(config, &handler)?
    } else {
        let algo = AlgoHandler::Lr(handler);
        match run_handshake(transport, world_size, &algo).await? {
            NegotiatedContext::Lr(ctx) => ctx,
            NegotiatedContext::Psi(_) => unreachable!("LR handler always yields an LrContext"),
        }
    };

    let output_path = config
        .storage_override("runtime.component.output.train_data")
        .or_else(|| config.lr_output.clone())
        .unwrap_or_else(|| PathBuf::from("lr_output"));
    runtime::run_lr(transport, world_size, &ctx, &dataset, &output_path).await?;
    Ok(())
}

/// When handshake is disabled, `label_owner`/`feature_nums` env vars stand in
/// for what negotiation would have discovered.
fn context_from_local_proposal(config: &Config, handler: &LrHandler) -> Result<LrContext, MainError> {
    let label_rank = config.label_owner_override().unwrap_or(if handler.has_label { handler.local_rank } else { 0 });
    let feature_nums = match config.feature_nums_override()? {
        Some(map) => (0..handler.world_size).map(|rank| map.get(&rank).copied().unwrap_or(handler.feature_num)).collect(),
        None => vec![handler.feature_num; handler.world_size as usize],
    };

    Ok(LrContext {
        num_epoch: handler.num_epoch,
        batch_size: handler.batch_size,
        last_batch_policy: handler.last_batch_policy,
        l0_norm: ic_core::registry::use_penalty_term(handler.l0_norm).then_some(handler.l0_norm),
        l1_norm: ic_core::registry::use_penalty_term(handler.l1_norm).then_some(handler.l1_norm),
        l2_norm: ic_core::registry::use_penalty_term(handler.l2_norm).then_some(handler.l2_norm),
        optimizer: handler.optimizer,
        sgd: Some(ic_core::params::lr::SgdParams { learning_rate: handler.learning_rate }),
        sigmoid_mode: handler.sigmoid_mode,
        ss_protocol: handler.ss_protocol,
        field_type: handler.field_type,
        fxp_fraction_bits: handler.fxp_bits,
        shard_serialize_format: handler.shard_format,
        trunc_mode: handler.trunc_mode,
        use_ttp: handler.use_ttp,
        ttp_server_host: handler.ttp_server_host.clone(),
        ttp_session_id: handler.ttp_session_id.clone(),
        ttp_adjust_rank: handler.ttp_adjust_rank,
        sample_size: handler.sample_size,
        feature_nums,
        label_rank,
        local_rank: handler.local_rank,
    })
}

/// Loads the join-key columns for PSI from a CSV with a header row, joining
/// the selected fields (or all columns if `field_names` is empty) into one
/// string key per row.
fn load_psi_items(path: &Path, field_names: &[String], should_sort: bool) -> Result<Vec<String>, MainError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let indices: Vec<usize> = if field_names.is_empty() {
        (0..headers.len()).collect()
    } else {
        field_names
            .iter()
            .filter_map(|name| headers.iter().position(|h| h == name))
            .collect()
    };

    let mut items = Vec::new();
    for record in reader.records() {
        let record = record?;
        let key = indices.iter().filter_map(|&i| record.get(i)).collect::<Vec<_>>().join("-");
        items.push(key);
    }
    if should_sort {
        items.sort();
    }
    Ok(items)
}

/// `--precheck_input`: reject a dataset containing duplicate join keys
/// before the PSI engine ever sees it, rather than letting a duplicate
/// silently shrink the intersection.
fn precheck_psi_items(items: &[String]) -> Result<(), MainError> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(item) {
            return Err(MainError::DuplicatePsiItem(item.clone()));
        }
    }
    Ok(())
}
