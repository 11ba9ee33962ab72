//! Run a pool of multiplexers against in-process loopback endpoints.
//!
//! This is a simple example to demonstrate how to use the [`isomux`] library.

use clap::Parser;
use std::sync::Arc;

use isomux::{
    loopback::LoopbackEndpoint, message::TERMINAL_FIELD, message::TRACE_FIELD,
    trace::generate_trace_number, CliArgs, IsoMessage, Mailbox, Message, MuxConfig, MuxError,
    Multiplexer, MultiplexerPool, PoolConfig, Registry,
};

/// The field the split strategy divides by.
const SPLIT_FIELD: &str = "2";

/// Create the members and their endpoints, and register the members.
async fn build_members(
    args: &CliArgs,
    mailbox: &Arc<Mailbox<IsoMessage>>,
    registry: &Registry<IsoMessage>,
) -> Result<Vec<Arc<LoopbackEndpoint>>, MuxError> {
    let mut endpoints = Vec::with_capacity(args.members);

    for index in 0..args.members {
        let config = MuxConfig {
            ready: vec![format!("acquirer-{index}.ready")],
            unhandled: Some(format!("acquirer-{index}.unhandled")),
            ..MuxConfig::new(
                format!("mux.acquirer-{index}"),
                format!("acquirer-{index}.send"),
                format!("acquirer-{index}.receive"),
            )
        };

        let endpoint = Arc::new(
            LoopbackEndpoint::for_mux(&config, Arc::clone(mailbox)).with_silent(args.silent.contains(&index)),
        )
        .start()
        .await;
        endpoints.push(endpoint);

        registry
            .register(Multiplexer::new_and_start(config, Arc::clone(mailbox))?)
            .await;
    }

    Ok(endpoints)
}

async fn run(args: CliArgs) -> Result<(), MuxError> {
    let mailbox = Mailbox::new_arc();
    let registry = Registry::new();
    let _endpoints = build_members(&args, &mailbox, &registry).await?;

    let config = match &args.pool_config {
        Some(path) => PoolConfig::from_json_file(path)?,
        None => PoolConfig {
            split_field: Some(SPLIT_FIELD.to_owned()),
            ..PoolConfig::new("pool", registry.names().await).with_strategy(args.strategy)
        },
    };
    let pool = Arc::new(MultiplexerPool::from_registry(config, &registry).await?);

    let timeout = args.timeout();
    let results = futures::future::join_all((0..args.requests).map(|index| {
        let pool = Arc::clone(&pool);
        async move {
            let request = IsoMessage::new("0200")
                .with_field(TERMINAL_FIELD, "29110001")
                .with_field(TRACE_FIELD, generate_trace_number())
                .with_field(SPLIT_FIELD, index.to_string());

            (index, pool.request(request, timeout).await)
        }
    }))
    .await;

    for (index, result) in results {
        match result {
            Ok(Some(response)) => println!(
                "Request #{index} answered with {mti} {rc}.",
                mti = response.type_code()?,
                rc = response.field("39").unwrap_or("--")
            ),
            Ok(None) => println!("Request #{index} expired after {timeout:?}."),
            Err(err) => println!("Request #{index} failed: {err}"),
        }
    }

    let mut out = std::io::stdout();
    pool.dump(&mut out, "").await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), MuxError> {
    let args = CliArgs::parse();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("SIGINT received, shutting down.");
            Ok(())
        },
        result = run(args) => result,
    }
}
