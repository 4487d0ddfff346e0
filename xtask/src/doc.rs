use duct::cmd;

pub fn doc_crate(private: bool, open: bool, app: bool) -> anyhow::Result<()> {
    let package = if app { "refind-rs" } else { "refind-rs-core" };
    let mut doc_args = vec!["doc", "--package", package];
    if private {
        doc_args.push("--document-private-items");
    }
    if open {
        doc_args.push("--open");
    }

    cmd("cargo", doc_args).run()?;
    Ok(())
}
