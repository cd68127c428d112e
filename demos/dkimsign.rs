use dkimsend::{
    key_store,
    message::UnsignedMessage,
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{self, SignRequest},
};
use std::{env, process};
use tokio::io::{self, AsyncReadExt};

// Reads a message on stdin and prints its DKIM-Signature header.
#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut args = env::args();

    let (key_file, domain, selector) = match (
        args.next().as_deref(),
        args.next(),
        args.next(),
        args.next(),
        args.next(),
    ) {
        (_, Some(key_file), Some(domain), Some(selector), None) => (key_file, domain, selector),
        (program, ..) => {
            eprintln!("usage: {} <key_file> <domain> <selector>", program.unwrap_or("dkimsign"));
            process::exit(1);
        }
    };

    let signing_key = key_store::load(key_file).await.unwrap();
    let domain = DomainName::new(&domain).unwrap();
    let selector = Selector::new(&selector).unwrap();

    let algorithm = SignatureAlgorithm::from(signing_key.key_type());

    let mut request = SignRequest::new(domain, selector, algorithm, signing_key);
    request.canonicalization = "relaxed/relaxed".parse().unwrap();

    let mut msg = vec![];
    let n = io::stdin().read_to_end(&mut msg).await.unwrap();
    assert!(n > 0, "empty message on stdin");

    let message = UnsignedMessage::parse(&msg).unwrap();

    let signed = signer::sign(message, request).unwrap();

    let header = signed.signature_header().replace("\r\n", "\n");
    println!("{header}");
}
