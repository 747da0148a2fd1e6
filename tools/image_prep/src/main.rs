use clap::Parser;
use std::path::PathBuf;
use tch::vision::image;

/// Resize a directory of images to a square target size on disk, so the
/// training dataset can run in preprocessed mode.
#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    input_dir: PathBuf,
    #[arg(short, long)]
    output_dir: PathBuf,
    #[arg(short, long, default_value_t = 256)]
    size: i64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if !cli.output_dir.exists() {
        std::fs::create_dir_all(&cli.output_dir)?;
    }

    let mut count = 0;
    for entry in std::fs::read_dir(&cli.input_dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| {
                matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png")
            });
        if !is_image {
            continue;
        }

        let resized = image::load_and_resize(&path, cli.size, cli.size)?;
        let file_name = path.file_name().expect("read_dir entries have file names");
        image::save(&resized, cli.output_dir.join(file_name))?;

        count += 1;
        if count % 1000 == 0 {
            println!("Resized {} images...", count);
        }
    }

    println!("Done. Resized {} images into {:?}.", count, cli.output_dir);
    Ok(())
}
