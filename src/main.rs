//! Command-line frontend: read an eID chip and export the face image.

use argh::FromArgs;
use emrtd_reader::{BirthdateSearch, CancelToken, ChipReader, DocumentRecord, Error, PcscReader};
use std::{fs::File, io::BufWriter, process::ExitCode};

#[derive(FromArgs)]
/// Read the biographic data and face image from an ICAO 9303 chip.
struct Args {
    /// full MRZ key input: document number, birth date and expiry date with
    /// their check digits
    #[argh(option)]
    mrz: Option<String>,

    /// nine-character document number (birth-date scan mode)
    #[argh(option)]
    document_number: Option<String>,

    /// first birth month candidate for scan mode
    #[argh(option, default = "1")]
    month_from: u8,

    /// last birth month candidate for scan mode
    #[argh(option, default = "12")]
    month_to: u8,

    /// first birth day candidate for scan mode
    #[argh(option, default = "1")]
    day_from: u8,

    /// last birth day candidate for scan mode
    #[argh(option, default = "31")]
    day_to: u8,

    /// current year, used to resolve birth centuries in scan mode
    #[argh(option)]
    current_year: Option<u16>,

    /// output path for the face image
    #[argh(option, default = "String::from(\"face.jpg\")")]
    image: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let args: Args = argh::from_env();
    match run(&args) {
        Ok(record) => {
            print_record(&record, &args.image);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(args: &Args) -> Result<DocumentRecord, Error> {
    let card = PcscReader::connect(&CancelToken::new())?;
    let mut reader = ChipReader::new(card);

    let mut sink = BufWriter::new(File::create(&args.image)?);

    match (&args.mrz, &args.document_number) {
        (Some(mrz), _) => reader.read_id_chip(mrz, &mut sink),
        (None, Some(number)) => {
            let number: &[u8; 9] = number.as_bytes().try_into().map_err(|_| {
                Error::DataGroupParse("document number must be nine characters")
            })?;
            let current_year = args.current_year.ok_or(Error::DataGroupParse(
                "scan mode requires --current-year",
            ))?;
            let search = BirthdateSearch {
                months: args.month_from..=args.month_to,
                days: args.day_from..=args.day_to,
            };
            reader.read_id_chip_scan(number, &search, current_year, &mut sink)
        }
        (None, None) => Err(Error::DataGroupParse(
            "either --mrz or --document-number is required",
        )),
    }
}

fn print_record(record: &DocumentRecord, image_path: &str) {
    println!("Document code:    {}", record.mrz.document_code);
    println!("Issuing state:    {}", record.mrz.issuing_state);
    println!("Document number:  {}", record.mrz.document_number);
    println!("Name of holder:   {}", record.mrz.name);
    println!("Nationality:      {}", record.mrz.nationality);
    println!("Date of birth:    {}", record.mrz.date_of_birth);
    println!("Sex:              {}", record.mrz.sex);
    println!("Date of expiry:   {}", record.mrz.date_of_expiry);
    println!("LDS version:      {}", record.com.lds_version);
    println!("Data groups:      {:02X?}", record.com.data_groups);
    if record.face_image {
        println!("Face image:       {image_path}");
    } else {
        println!("Face image:       not present");
    }
}
