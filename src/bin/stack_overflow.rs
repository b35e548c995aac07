use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use overflow_lab::chardev::{BoundedDevice, Kernel, VulnDevice, BUF_LEN};
use overflow_lab::cli::{exit_code, run_device_write, DeviceArgs};

/// Load a character-device module, write to it once, unload it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of bytes passed to write(2)
    #[arg(short, long, default_value_t = BUF_LEN)]
    len: usize,

    /// Byte value the payload is filled with
    #[arg(short, long, default_value_t = 0x41)]
    fill: u8,

    /// Load the bounds-checked device instead of the vulnerable one
    #[arg(long)]
    fixed: bool,

    #[command(flatten)]
    device: DeviceArgs,
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();
    let config = args.device.load_config()?;
    let kernel = Kernel::new(config.kernel);

    let mut out = io::stdout().lock();
    let status = if args.fixed {
        run_device_write::<BoundedDevice, _>(&kernel, args.len, args.fill, &mut out)?
    } else {
        run_device_write::<VulnDevice, _>(&kernel, args.len, args.fill, &mut out)?
    };
    Ok(exit_code(status))
}
