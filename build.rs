fn main() {
    let target = std::env::var("TARGET").unwrap_or_default();

    if target.contains("musl") {
        // musl targets link a manually built static libspeexdsp, no pkg-config
        if let Ok(sysroot) = std::env::var("MUSL_SYSROOT") {
            println!("cargo:rustc-link-search=native={}/usr/lib", sysroot);
        }
        println!("cargo:rustc-link-lib=static=speexdsp");
        return;
    }

    // ALSA is linked by alsa-sys; speexdsp is located via pkg-config
    pkg_config::Config::new()
        .probe("speexdsp")
        .expect("Failed to find speexdsp. Please install libspeexdsp-dev.");
}
