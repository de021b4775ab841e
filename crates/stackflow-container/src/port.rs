use nix::sys::signal;
use nix::unistd::Pid;
use stackflow_core::{HostPort, Protocol};
use std::io::ErrorKind;
use std::net::{TcpListener, UdpSocket};
use std::process::Command;

/// ポートが既にバインドされているか
///
/// 実際に bind を試みて判定する。権限不足（特権ポート）は使用中とみなさない。
pub fn is_port_bound(port: &HostPort) -> bool {
    let result = match port.protocol {
        Protocol::Tcp => TcpListener::bind(("0.0.0.0", port.port)).map(drop),
        Protocol::Udp => UdpSocket::bind(("0.0.0.0", port.port)).map(drop),
    };

    match result {
        Ok(()) => false,
        Err(e) if e.kind() == ErrorKind::AddrInUse => true,
        Err(e) => {
            tracing::debug!(port = %port, error = %e, "Port probe inconclusive");
            false
        }
    }
}

/// 指定されたポートを使用しているプロセスの PID を取得する
pub fn find_pids_by_port(port: &HostPort) -> Vec<i32> {
    // lsof -t -i{tcp|udp}:{port} を実行
    let output = Command::new("lsof")
        .arg("-t")
        .arg(format!("-i{}:{}", port.protocol.as_str(), port.port))
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let pids_str = String::from_utf8_lossy(&out.stdout);
            let mut pids: Vec<i32> = pids_str
                .lines()
                .filter_map(|line| line.trim().parse::<i32>().ok())
                .collect();
            pids.dedup();
            pids
        }
        _ => vec![], // lsof が無い・権限が無い場合は不明として扱う
    }
}

pub fn is_process_alive(pid: i32) -> bool {
    // signal 0 を送ることで存在確認が可能
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // 他ユーザーのプロセスは存在している
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
