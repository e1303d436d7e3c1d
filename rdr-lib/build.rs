use std::env::var_os;
use std::error::Error;
use std::fs::copy;
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn Error>> {
    include_default_configs()?;
    include_leap_seconds()?;
    Ok(())
}

fn etc_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("etc").join(name)
}

fn out_path(name: &str) -> Result<PathBuf, Box<dyn Error>> {
    let out_dir = var_os("OUT_DIR").ok_or("OUT_DIR not set")?;
    Ok(Path::new(&out_dir).join(name))
}

fn include_default_configs() -> Result<(), Box<dyn Error>> {
    for name in ["npp", "j01", "j02", "j03"] {
        let fname = format!("{name}.config.yaml");
        let src_path = etc_path(&fname);
        println!("cargo::rerun-if-changed={}", src_path.display());
        copy(&src_path, out_path(&fname)?)?;
    }
    Ok(())
}

// Obtain a new list from https://hpiers.obspm.fr/iers/bul/bulc/ntp/leap-seconds.list
fn include_leap_seconds() -> Result<(), Box<dyn Error>> {
    let src_path = etc_path("leap-seconds.list");
    println!("cargo::rerun-if-changed={}", src_path.display());
    copy(&src_path, out_path("leap-seconds.list")?)?;
    Ok(())
}
