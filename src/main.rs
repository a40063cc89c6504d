fn main() -> std::process::ExitCode {
    npt_lib::run()
}
