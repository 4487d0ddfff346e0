use clap::Subcommand;
use duct::cmd;

#[derive(Subcommand)]
pub enum Test {
    /// Run clippy and the unit tests of the core crate on the host (default)
    Host,

    /// Run the integration test application in a VM with uefi-run
    Vm {
        /// Path to the OVMF code file
        #[arg(long)]
        ovmf_code: Option<String>,
    },
}

pub fn test_crate(command: Option<Test>) -> anyhow::Result<()> {
    match command.unwrap_or(Test::Host) {
        Test::Host => test_on_host(),
        Test::Vm { ovmf_code } => test_on_vm(ovmf_code.as_deref()),
    }
}

fn test_on_host() -> anyhow::Result<()> {
    cmd!("cargo", "clippy", "--package", "refind-rs-core").run()?;
    cmd!("cargo", "test", "--package", "refind-rs-core", "--lib").run()?;
    Ok(())
}

fn test_on_vm(ovmf_code: Option<&str>) -> anyhow::Result<()> {
    let mut run_args = vec!["-d"];

    if let Some(ovmf_code) = ovmf_code {
        run_args.extend(["-b", ovmf_code]);
    }

    run_args.push("target/x86_64-unknown-uefi/debug/refind-rs-tests.efi");
    cmd!("cargo", "install", "uefi-run").run()?; // will not install if its already installed
    cmd!(
        "cargo",
        "build",
        "--bin",
        "refind-rs-tests",
        "--target",
        "x86_64-unknown-uefi",
        "--features",
        "global_allocator,panic_handler"
    )
    .run()?;
    if let Err(e) = cmd("uefi-run", run_args).run() {
        println!(
            "hint: if the error was that the PC BIOS could not be loaded, you may have to specify ovmf-code"
        );
        return Err(e.into());
    }
    Ok(())
}
