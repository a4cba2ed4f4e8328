//! LAN address and QR code for opening Lantern from another device

use crate::types::LanInfo;
use qrcode::render::svg;
use qrcode::QrCode;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// The host's outward-facing IPv4 address.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// interface it would route through.
pub fn local_ipv4() -> Result<Ipv4Addr, String> {
    let socket =
        UdpSocket::bind("0.0.0.0:0").map_err(|e| format!("Failed to open UDP socket: {}", e))?;
    socket
        .connect("8.8.8.8:80")
        .map_err(|e| format!("No network route available: {}", e))?;
    let addr = socket
        .local_addr()
        .map_err(|e| format!("Failed to read local address: {}", e))?;

    match addr.ip() {
        IpAddr::V4(ip) if usable_lan_ip(ip) => Ok(ip),
        other => Err(format!("No LAN IPv4 address found (got {})", other)),
    }
}

fn usable_lan_ip(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified() && !ip.is_link_local()
}

pub fn lan_url(ip: Ipv4Addr, port: u16) -> String {
    format!("http://{}:{}", ip, port)
}

/// SVG QR code encoding `text`
pub fn qr_svg(text: &str) -> Result<String, String> {
    let code = QrCode::new(text.as_bytes()).map_err(|e| format!("Failed to encode QR code: {}", e))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

pub fn lan_info(port: u16) -> Result<LanInfo, String> {
    let url = lan_url(local_ipv4()?, port);
    let qr_svg = qr_svg(&url)?;
    Ok(LanInfo { url, qr_svg })
}
