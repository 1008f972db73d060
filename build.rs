fn main() {
    // Firmware image only; host builds of the library link normally
    if std::env::var_os("CARGO_FEATURE_ESP32C6").is_some() {
        println!("cargo:rustc-link-arg-bins=-Tlinkall.x");

        println!("cargo:rustc-env=ESP_IDF_VERSION=v5.0");
        println!("cargo:rustc-env=IDF_TARGET=esp32c6");
    }
}
