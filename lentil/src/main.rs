mod common;
mod generate;
mod simulate;
mod train;

use clap::{Parser, Subcommand};
use log::info;

use generate::*;
use simulate::*;
use train::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Class-conditional PixelCNN on small grayscale images.\n\
		  Train a masked convolutional network that predicts the\n\
		  discretised intensity of every pixel from the pixels before it,\n\
		  then sample images that blend two classes."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train a conditional PixelCNN",
        long_about = "Train a conditional PixelCNN in three stages: \n\
		      (1) Load a labeled image dataset (MNIST IDX files or synthetic)\n\
		      (2) Fit the network by minibatch SGD, checkpointing every epoch\n\
		      (3) Write between-class strips for the requested class pairs.\n"
    )]
    Train(TrainArgs),

    #[command(
        about = "Generate between-class strips from a trained experiment",
        long_about = "Rebuild the network from {exp}/params.json, load the best\n\
		      (or last) checkpoint and sample images whose conditioning\n\
		      vector moves linearly from one class to another.\n"
    )]
    Generate(GenerateArgs),

    #[command(
        about = "Write a synthetic dataset in the MNIST IDX layout",
        long_about = "Draw noisy per-class stripe images and write the four\n\
		      IDX files `train` reads with `--dataset mnist`.\n"
    )]
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            train_pixel_cnn(args)?;
        }
        Commands::Generate(args) => {
            generate_strips(args)?;
        }
        Commands::Simulate(args) => {
            simulate_dataset(args)?;
        }
    }

    info!("Done");
    Ok(())
}
