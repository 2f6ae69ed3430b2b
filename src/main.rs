fn main() -> Result<(), Box<dyn std::error::Error>> {
    patient_chat::cli::main()
}
