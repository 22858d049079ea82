use std::env;
use std::path::PathBuf;

const WATCHED_VARIABLES: [&str; 4] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_DYNAMIC", "VCPKGRS_TRIPLET"];

fn main() {
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() == "windows"
        && env::var_os("FFMPEG_DIR").is_none()
    {
        warn_about_vcpkg();
    }
}

/// Points Windows builds at a vcpkg FFmpeg install. Normalization needs the
/// libx264 encoder, so the `ffmpeg[x264]` port is the one to install.
fn warn_about_vcpkg() {
    let Ok(vcpkg_root) = env::var("VCPKG_ROOT") else {
        println!(
            "cargo:warning=FFMPEG_DIR is not set. Install ffmpeg[x264] via vcpkg and set VCPKG_ROOT and FFMPEG_DIR."
        );
        return;
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let install = PathBuf::from(&vcpkg_root).join("installed").join(&triplet);

    if !install.exists() {
        println!(
            "cargo:warning=VCPKG_ROOT is set but {} does not exist.",
            install.display()
        );
        return;
    }

    println!(
        "cargo:warning=Found vcpkg FFmpeg at {0}. Set FFMPEG_DIR={0} to silence this warning.",
        install.display()
    );
    if env::var_os("VCPKGRS_DYNAMIC").is_none() {
        println!("cargo:warning=Set VCPKGRS_DYNAMIC=1 when linking a dynamic vcpkg FFmpeg.");
    }
}
