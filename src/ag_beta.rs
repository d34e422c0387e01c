use std::io::Write;

use clap::{App, Arg};

use ag_package::beta::CLI;

fn main() {
    env_logger::init();

    let matches = App::new("ag-beta")
        .version("1.0")
        .about("Relocate beta-diversity distance matrices into a depth's package directory")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("CONFIG.TOML")
                .help("TOML run description")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("depth")
                .short("d")
                .long("depth")
                .value_name("DEPTH")
                .help("Rarefaction depth to relocate")
                .takes_value(true)
                .required(true),
        )
        .get_matches();

    let depth = match matches.value_of("depth").unwrap().parse::<u32>() {
        Ok(depth) => depth,
        Err(err) => {
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
