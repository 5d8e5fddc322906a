//! 进程内传输契约测试。
//!
//! 测试目标（Why）：
//! - 锁定绑定端/连接端的身份帧语义，路由器的请求与回复路径完全依赖它；
//! - 锁定关闭传播：绑定端关闭或被拆除时，连接端必须在读完缓冲后观察到断开。
//!
//! 结构安排（How）：
//! - 每个用例新建独立的 `InprocTransport`，端点表互不干扰；
//! - 阻塞等待统一使用 `recv_timeout`，超时设置为秒级，避免 CI 抖动造成误报。

use std::time::Duration;

use bytes::Bytes;
use tessera_core::Envelope;
use tessera_transport::{InprocTransport, Transport, TransportError, recv_timeout};

const WAIT: Duration = Duration::from_secs(2);

fn frame(text: &'static str) -> Bytes {
    Bytes::from_static(text.as_bytes())
}

/// 绑定端接收时压入身份帧，回复时按身份帧投递到正确的对端。
#[test]
fn bound_socket_routes_replies_by_identity() {
    let transport = InprocTransport::new();
    let mut server = transport.bind("inproc://echo").expect("首次绑定应成功");
    let mut alice = transport.connect("inproc://echo").expect("连接已绑定地址");
    let mut bob = transport.connect("inproc://echo").expect("连接已绑定地址");
    assert_eq!(server.peer_count(), 2);

    alice
        .send(Envelope::from_frames([frame("from-alice")]))
        .expect("发送成功");
    bob.send(Envelope::from_frames([frame("from-bob")]))
        .expect("发送成功");

    for _ in 0..2 {
        let mut request = recv_timeout(server.as_mut(), WAIT)
            .expect("接收不应失败")
            .expect("应收到请求");
        assert_eq!(request.len(), 2, "绑定端必须压入一个身份帧");
        let identity = request.pop_front().expect("身份帧");
        let body = request.pop_front().expect("负载帧");
        let mut reply = Envelope::from_frames([identity]);
        reply.push_back(Bytes::from(format!("re:{}", String::from_utf8_lossy(&body))));
        server.send(reply).expect("回复已知对端应成功");
    }

    let alice_reply = recv_timeout(alice.as_mut(), WAIT)
        .expect("接收不应失败")
        .expect("alice 应收到回复");
    assert_eq!(alice_reply.into_frames(), vec![frame("re:from-alice")]);
    let bob_reply = recv_timeout(bob.as_mut(), WAIT)
        .expect("接收不应失败")
        .expect("bob 应收到回复");
    assert_eq!(bob_reply.into_frames(), vec![frame("re:from-bob")]);
}

/// 同名地址只能绑定一次，关闭后可重新绑定。
#[test]
fn address_is_exclusive_until_closed() {
    let transport = InprocTransport::new();
    let mut first = transport.bind("inproc://exclusive").expect("首次绑定");
    let err = transport
        .bind("inproc://exclusive")
        .err()
        .expect("重复绑定必须失败");
    assert!(matches!(err, TransportError::AddressInUse { .. }));
    first.close().expect("关闭成功");
    first.close().expect("重复关闭是幂等的");
    assert!(!transport.is_bound("inproc://exclusive"));
    transport
        .bind("inproc://exclusive")
        .expect("关闭后可以重新绑定");
}

/// 连接未绑定地址立即失败。
#[test]
fn connect_to_unbound_address_is_refused() {
    let transport = InprocTransport::new();
    let err = transport
        .connect("inproc://nobody")
        .err()
        .expect("无人绑定时必须拒绝");
    assert!(matches!(err, TransportError::ConnectionRefused { .. }));
    let err = transport
        .connect("tcp://127.0.0.1:1")
        .err()
        .expect("scheme 不匹配必须拒绝");
    assert!(matches!(err, TransportError::UnsupportedScheme { .. }));
}

/// 向未知身份回复返回 HostUnreachable，套接字保持可用。
#[test]
fn reply_to_unknown_identity_is_unreachable() {
    let transport = InprocTransport::new();
    let mut server = transport.bind("inproc://unknown").expect("绑定");
    let err = server
        .send(Envelope::from_frames([frame("ghost-id"), frame("x")]))
        .expect_err("未知身份必须不可达");
    assert!(matches!(err, TransportError::HostUnreachable { .. }));

    let mut client = transport.connect("inproc://unknown").expect("连接");
    client
        .send(Envelope::from_frames([frame("ping")]))
        .expect("发送成功");
    assert!(recv_timeout(server.as_mut(), WAIT).expect("接收").is_some());
}

/// 拆除绑定端后，连接端先读完缓冲，再观察到断开。
#[test]
fn severed_endpoint_drains_then_disconnects_peers() {
    let transport = InprocTransport::new();
    let mut server = transport.bind("inproc://severed").expect("绑定");
    let mut client = transport.connect("inproc://severed").expect("连接");
    client
        .send(Envelope::from_frames([frame("hello")]))
        .expect("发送");
    let mut request = recv_timeout(server.as_mut(), WAIT)
        .expect("接收")
        .expect("请求");
    let identity = request.pop_front().expect("身份帧");
    server
        .send(Envelope::from_frames([identity, frame("last-words")]))
        .expect("回复");

    assert!(transport.sever("inproc://severed"));
    assert!(matches!(
        server.try_recv(),
        Err(TransportError::Disconnected { .. })
    ));

    let buffered = client.try_recv().expect("缓冲应先被读出");
    assert_eq!(buffered.map(Envelope::into_frames), Some(vec![frame("last-words")]));
    assert!(matches!(
        client.try_recv(),
        Err(TransportError::Disconnected { .. })
    ));
    assert!(matches!(
        client.send(Envelope::from_frames([frame("again")])),
        Err(TransportError::Disconnected { .. })
    ));
}

/// 主动断开对端后，该对端收到断开，其他对端不受影响。
#[test]
fn disconnect_peer_only_affects_that_peer() {
    let transport = InprocTransport::new();
    let mut server = transport.bind("inproc://kick").expect("绑定");
    let mut victim = transport.connect("inproc://kick").expect("连接");
    let mut bystander = transport.connect("inproc://kick").expect("连接");

    victim
        .send(Envelope::from_frames([frame("bad")]))
        .expect("发送");
    let request = recv_timeout(server.as_mut(), WAIT)
        .expect("接收")
        .expect("请求");
    let identity = request.front().cloned().expect("身份帧");
    assert!(server.disconnect_peer(&identity).expect("断开成功"));
    assert!(!server.disconnect_peer(&identity).expect("重复断开返回 false"));

    assert!(matches!(
        victim.try_recv(),
        Err(TransportError::Disconnected { .. })
    ));
    bystander
        .send(Envelope::from_frames([frame("good")]))
        .expect("旁观者仍可发送");
    assert!(recv_timeout(server.as_mut(), WAIT).expect("接收").is_some());
    assert_eq!(server.peer_count(), 1);
}
