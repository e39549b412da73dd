mod cmd;

use std::error::Error;

use clap::Parser;
use cmd::{Cli, Command, SummaryArgs};
use convnet_models::AlexNet;
use convnet_nn::BackendConfig;
use log::debug;

fn summary(config: BackendConfig, args: &SummaryArgs) -> Result<(), Box<dyn Error>> {
    let mut config = config;
    if let Some(format) = args.data_format {
        config.image_data_format = format;
    }
    debug!("summary with {:?}", args);

    let model = AlexNet::build_with(&config, args.width, args.height, args.depth, args.classes, args.reg);
    if args.json {
        println!("{}", model.to_json()?);
    } else {
        println!("{}", model.summary()?);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let config = BackendConfig::load()?;

    match cli.command {
        Command::Summary(args) => summary(config, &args)?,
        Command::Config => println!("{}", config.to_json()?),
    }
    Ok(())
}
