//! TCP 传输集成测试。
//!
//! 测试目标（Why）：
//! - 确认网络传输与进程内传输的身份帧语义一致，路由器可以无差别地使用二者；
//! - 确认对端关闭会以错误就绪的形式传递到连接端。
//!
//! 结构安排（How）：
//! - 所有端点绑定 `127.0.0.1:0`，由系统分配端口，避免并行测试冲突；
//! - 阻塞等待统一使用 `recv_timeout`。

use std::time::Duration;

use bytes::Bytes;
use tessera_core::{Envelope, TcpSettings};
use tessera_transport::{Transport, TransportError, recv_timeout};
use tessera_transport_tcp::TcpTransport;

const WAIT: Duration = Duration::from_secs(5);

fn transport() -> TcpTransport {
    TcpTransport::new(TcpSettings::default()).expect("IO 运行时应能启动")
}

/// 请求经身份帧送达绑定端，回复按身份帧回到原连接。
#[test]
fn request_and_reply_round_trip_over_loopback() {
    let transport = transport();
    let mut server = transport.bind("tcp://127.0.0.1:0").expect("绑定回环地址");
    let address = server.address().to_owned();
    assert!(!address.ends_with(":0"), "应返回实际监听端口: {address}");

    let mut client = transport.connect(&address).expect("连接监听端口");
    client
        .send(Envelope::from_frames([
            Bytes::new(),
            Bytes::from_static(b"ping"),
        ]))
        .expect("发送请求");

    let mut request = recv_timeout(server.as_mut(), WAIT)
        .expect("接收不应失败")
        .expect("应收到请求");
    assert_eq!(request.len(), 3, "绑定端必须压入身份帧");
    let identity = request.pop_front().expect("身份帧");
    assert_eq!(
        request.into_frames(),
        vec![Bytes::new(), Bytes::from_static(b"ping")]
    );

    server
        .send(Envelope::from_frames([
            identity,
            Bytes::new(),
            Bytes::from_static(b"pong"),
        ]))
        .expect("回复已知对端");
    let reply = recv_timeout(client.as_mut(), WAIT)
        .expect("接收不应失败")
        .expect("应收到回复");
    assert_eq!(
        reply.into_frames(),
        vec![Bytes::new(), Bytes::from_static(b"pong")]
    );
}

/// 绑定端关闭后，连接端观察到断开。
#[test]
fn closing_the_endpoint_disconnects_clients() {
    let transport = transport();
    let mut server = transport.bind("tcp://127.0.0.1:0").expect("绑定");
    let address = server.address().to_owned();
    let mut client = transport.connect(&address).expect("连接");
    client
        .send(Envelope::from_frames([Bytes::from_static(b"hello")]))
        .expect("发送");
    recv_timeout(server.as_mut(), WAIT)
        .expect("接收")
        .expect("请求到达后对端已登记");

    server.close().expect("关闭绑定端");
    let outcome = recv_timeout(client.as_mut(), WAIT);
    assert!(
        matches!(outcome, Err(TransportError::Disconnected { .. })),
        "连接端应观察到断开: {outcome:?}"
    );
}

/// 无人监听的端口返回拒绝连接。
#[test]
fn connecting_to_closed_port_is_refused() {
    let transport = transport();
    let address = {
        let mut probe = transport.bind("tcp://127.0.0.1:0").expect("绑定探测端口");
        let address = probe.address().to_owned();
        probe.close().expect("释放端口");
        address
    };
    std::thread::sleep(Duration::from_millis(50));
    let err = transport.connect(&address).err().expect("端口已释放");
    assert!(
        matches!(
            err,
            TransportError::ConnectionRefused { .. } | TransportError::Io { .. }
        ),
        "unexpected error: {err:?}"
    );
}

/// 非 tcp scheme 被拒绝。
#[test]
fn foreign_scheme_is_unsupported() {
    let err = transport()
        .bind("inproc://x")
        .err()
        .expect("scheme 不匹配");
    assert!(matches!(err, TransportError::UnsupportedScheme { .. }));
}
