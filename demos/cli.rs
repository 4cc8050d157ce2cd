//! Minimal terminal driver for `KvStore`, gated behind the `admin` feature.
//! Not part of the specified surface; a convenience for exercising the
//! engine by hand.

use std::path::PathBuf;

use structopt::StructOpt;

#[path = "kvstore.rs"]
mod kvstore;
use kvstore::KvStore;

#[derive(StructOpt)]
#[structopt(name = "vaultkv", about = "Drive a vaultkv store from the command line")]
struct Cli {
	#[structopt(long, parse(from_os_str), default_value = "vaultkv_data")]
	data_dir: PathBuf,

	#[structopt(subcommand)]
	command: Command,
}

#[derive(StructOpt)]
enum Command {
	Get { key: String },
	Put { key: String, value: String },
	Delete { key: String },
}

fn main() {
	env_logger::init();
	let cli = Cli::from_args();
	let options = vaultkv::Options::new(cli.data_dir);
	let store = match KvStore::open(options) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("failed to open store: {}", e);
			std::process::exit(1);
		}
	};

	let result = match cli.command {
		Command::Get { key } => store.get(key.as_bytes()).map(|v| match v {
			Some(value) => println!("{}", String::from_utf8_lossy(&value)),
			None => println!("(not found)"),
		}),
		Command::Put { key, value } => store.put(key.as_bytes(), value.as_bytes()),
		Command::Delete { key } => store.delete(key.as_bytes()),
	};

	if let Err(e) = result {
		eprintln!("error: {}", e);
		std::process::exit(1);
	}
}
