use std::io::Write;

use clap::{App, Arg};

use ag_package::package::CLI;

fn main() {
    env_logger::init();

    let matches = App::new("ag-package")
        .version("1.0")
        .about("Package processed American Gut outputs into per-depth directories")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("CONFIG.TOML")
                .help("TOML run description: depths, metrics, input and output trees")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("depth")
                .short("d")
                .long("depth")
                .value_name("DEPTH")
                .help("Package only this rarefaction depth")
                .takes_value(true),
        )
        .get_matches();

    let depth = match matches.value_of("depth").map(|d| d.parse::<u32>()) {
        None => None,
        Some(Ok(depth)) => Some(depth),
        Some(Err(err)) => {
            std::io::stderr()
                .write(format!("bad depth: {}\n", err).as_bytes())
                .unwrap();
            std::process::exit(1);
        }
    };

    let cli = CLI {
        config_file: matches.value_of("config").unwrap().to_string(),
        depth,
    };

    match cli.run() {
        Ok(_) => (),
        Err(err) => {
            std::io::stderr()
                .write(format!("{:?}\n", err).as_bytes())
                .unwrap();
            std::process::exit(1);
        }
    }
}
