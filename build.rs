fn main() {
    // Host builds (`--no-default-features`) have no ESP-IDF environment to emit.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
