use std::{error::Error, net::SocketAddr};

use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use coap_ssp::{
    CoapOption, CoapRequest, MessageClass, MessageType, ObserveOption, Packet, RequestType,
    option_value::OptionValueU16,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fetch or observe a resource of a CoAP sensor provider")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:5683")]
    server: SocketAddr,

    /// Resource path
    #[arg(default_value = "/temperature")]
    path: String,

    /// Keep receiving notifications
    #[arg(long)]
    observe: bool,

    /// Accept option value (e.g. 202 for text/turtle)
    #[arg(long)]
    accept: Option<u16>,

    /// Stop after this many notifications
    #[arg(long)]
    count: Option<usize>,
}

fn request(args: &Args, token: &[u8], observe: Option<ObserveOption>) -> Packet {
    let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
    request.message.header.set_type(MessageType::Confirmable);
    request.message.header.message_id = rand::random();
    request.message.set_token(token.to_vec());
    request.set_method(RequestType::Get);
    request.set_path(&args.path);
    if let Some(flag) = observe {
        request.set_observe_flag(flag);
    }
    if let Some(accept) = args.accept {
        request
            .message
            .add_option_as(CoapOption::Accept, OptionValueU16(accept));
    }
    request.message
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let bind: SocketAddr = if args.server.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(args.server).await?;

    let token = rand::random::<u32>().to_be_bytes();
    let flag = args.observe.then_some(ObserveOption::Register);
    socket.send(&request(&args, &token, flag).to_bytes()?).await?;
    info!(server = %args.server, path = %args.path, observe = args.observe, "Request sent");

    let mut buf = vec![0u8; 8192];
    let mut received = 0usize;
    loop {
        let len = tokio::select! {
            len = socket.recv(&mut buf) => len?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let packet = match Packet::from_bytes(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = ?e, "Undecodable datagram");
                continue;
            }
        };
        if packet.get_token() != token {
            debug!("Ignoring message for another token");
            continue;
        }
        if packet.header.get_type() == MessageType::Confirmable {
            let mut ack = Packet::new();
            ack.header.set_type(MessageType::Acknowledgement);
            ack.header.message_id = packet.header.message_id;
            ack.header.code = MessageClass::Empty;
            socket.send(&ack.to_bytes()?).await?;
        }

        let sequence = packet.get_observe_value().and_then(|value| value.ok());
        let format = packet
            .get_first_option_as::<OptionValueU16>(CoapOption::ContentFormat)
            .and_then(|value| value.ok())
            .map(|value| value.0);
        info!(code = %packet.header.code, ?sequence, ?format, "Response");
        println!("{}", String::from_utf8_lossy(&packet.payload));

        received += 1;
        let done = !args.observe
            || sequence.is_none()
            || args.count.is_some_and(|count| received >= count);
        if done {
            break;
        }
    }

    if args.observe {
        // Best effort; the answer is not awaited
        let deregister = request(&args, &token, Some(ObserveOption::Deregister));
        socket.send(&deregister.to_bytes()?).await?;
    }
    Ok(())
}
