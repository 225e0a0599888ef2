use signxpi_core::manifest;

use crate::cli::args::IdentityArgs;
use crate::exit_codes::SUCCESS;

pub fn run(args: IdentityArgs) -> anyhow::Result<i32> {
    match manifest::extension_id_from_path(&args.xpi) {
        Ok(id) => {
            println!("{id}");
            Ok(SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {}: {e}", args.xpi.display());
            Ok(e.exit_code())
        }
    }
}
