use super::args::*;

pub mod handle;
pub mod identity;
pub mod upload;

use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Handle(args) => handle::run(args).await,
        Command::Upload(args) => upload::run(args).await,
        Command::Identity(args) => identity::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
