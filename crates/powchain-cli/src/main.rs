use anyhow::Result;
use clap::{Parser, Subcommand};
use powchain_core::{chain::Chain, constants::DEFAULT_DIFFICULTY, mine, unix_timestamp, Block};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "powchain")]
#[command(about = "Builds and prints a proof-of-work block chain")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mine a chain of blocks and print one line per block
    Build {
        /// Number of blocks to mine, genesis included
        #[arg(long, default_value_t = 5)]
        blocks: u64,
        /// Required leading-zero prefix length of the nonce-combined digest
        #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
        difficulty: usize,
        /// Payload prefix; block i carries "<prefix><i>", genesis the bare prefix
        #[arg(long, default_value = "tx")]
        transaction: String,
        /// Search nonces across all cores instead of sequentially
        #[arg(long)]
        parallel: bool,
        /// Give up on a block after this many nonce attempts
        #[arg(long)]
        max_attempts: Option<u64>,
        /// Print blocks as JSON instead of the one-line report
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Build {
            blocks,
            difficulty,
            transaction,
            parallel,
            max_attempts,
            json,
        } => {
            let mut chain = Chain::new(difficulty);
            if let Some(limit) = max_attempts {
                chain = chain.with_max_attempts(limit);
            }

            for i in 0..blocks {
                let tx = if i == 0 {
                    transaction.clone()
                } else {
                    format!("{transaction}{i}")
                };
                if parallel {
                    let previous_hash = chain
                        .tip()
                        .map(|b| b.hash().to_owned())
                        .unwrap_or_default();
                    let mut block = Block::new(i, previous_hash, tx, unix_timestamp());
                    let nonce = mine::search_parallel(block.hash(), difficulty);
                    block.set_nonce(nonce);
                    chain.append_block(block)?;
                } else {
                    chain.append_transaction(tx)?;
                }
            }
            chain.verify()?;

            for block in &chain {
                if json {
                    println!("{}", serde_json::to_string(block)?);
                } else {
                    println!(
                        "{} {} {} {} {}",
                        block.index(),
                        block.transaction(),
                        block.hash(),
                        block.hash_with_nonce()?,
                        block
                            .nonce()
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "-".into()),
                    );
                }
            }
        }
    }
    Ok(())
}
