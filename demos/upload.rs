use std::env;
use std::process;

use hyper::Client;
use mpart_upload::upload::{PhotoUpload, UploadConfig, Uploader};

// Upload one photo from the command line. The endpoint and token come from
// UPLOAD_API_URL and UPLOAD_API_TOKEN; an https endpoint needs a TLS-capable
// connector in place of Client::new().
#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);

    let (photo, event_id, location, price) =
        match (args.next(), args.next(), args.next(), args.next()) {
            (Some(photo), Some(event_id), Some(location), Some(price)) => {
                (photo, event_id, location, price)
            }
            _ => {
                eprintln!("Usage: upload <photo> <event-id> <location> <price> [bib-number]");
                process::exit(1);
            }
        };

    let price: u32 = price.parse().unwrap_or_else(|_| {
        eprintln!("price must be a whole number");
        process::exit(1);
    });

    let config = UploadConfig::from_env().unwrap_or_else(|err| {
        eprintln!("{err}");
        process::exit(1);
    });

    let mut upload = PhotoUpload::new(&photo, &event_id, &location, price).unwrap_or_else(|err| {
        eprintln!("{err}");
        process::exit(1);
    });

    if let Some(bib_number) = args.next() {
        upload = upload.bib_number(bib_number);
    }

    let uploader = Uploader::new(Client::new(), config);

    match uploader.upload(&upload).await {
        Ok(reply) if reply.success => {
            println!("photo uploaded");
            if let Some(id) = reply.photo_id {
                println!("photo id: {id}");
            }
            if let Some(id) = reply.original_file_id {
                println!("original file id: {id}");
            }
            if let Some(id) = reply.cloudflare_id {
                println!("cloudflare id: {id}");
            }
            if let Some(message) = reply.message {
                println!("message: {message}");
            }
        }
        Ok(reply) => {
            eprintln!(
                "upload not accepted: {}",
                reply.message.unwrap_or_else(|| "no message".to_string())
            );
            process::exit(1);
        }
        Err(err) => {
            eprintln!("upload failed: {err}");
            process::exit(1);
        }
    }
}
