// Gateway protocol adapter against a scripted TCP terminal

use proptest::prelude::*;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use warden_core::core::{OrderIntent, OrderKind, OrderResult, Side, TickEvent};
use warden_core::engine::OrderGateway;
use warden_core::gateway::{
    decode_command, encode_command, encode_tick, CommandClient, MarketDataSubscriber,
    TcpBroadcastSource, TcpCommandTransport, TickDecoder,
};
use warden_core::monitoring::MetricsRegistry;
use warden_core::resilience::BackoffConfig;

#[test]
fn test_subscriber_drops_and_counts_malformed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let lines = [
            r#"{"type":"TICK","symbol":"EURUSD","bid":1.1,"ask":1.1002,"time":1700000000000}"#,
            "not json at all",
            r#"{"type":"TICK","symbol":"EURUSD","bid":1.1001,"ask":1.1003,"time":1700000000100,"volume":2.5}"#,
            r#"{"type":"QUOTE","symbol":"EURUSD"}"#,
            r#"{"type":"TICK","symbol":"GBPUSD","bid":1.3,"ask":1.3002,"time":1700000000200}"#,
        ];
        for line in lines {
            writeln!(stream, "{}", line).unwrap();
        }
        stream.flush().unwrap();
        // hold the connection until the client is done
        thread::sleep(Duration::from_millis(500));
    });

    let metrics = MetricsRegistry::new().unwrap();
    let source = TcpBroadcastSource::new(addr, BackoffConfig::fast(3));
    let mut subscriber =
        MarketDataSubscriber::new(source, Arc::new(AtomicBool::new(false))).with_metrics(metrics.clone());

    let mut ticks: Vec<TickEvent> = Vec::new();
    let mut sink = |tick: TickEvent| {
        ticks.push(tick);
        ticks.len() < 3
    };
    let stats = subscriber.run(&mut sink).unwrap();
    server.join().unwrap();

    assert_eq!(stats.messages, 5);
    assert_eq!(stats.ticks, 3);
    assert_eq!(stats.malformed, 2);
    assert_eq!(metrics.gateway().malformed_messages_total.get(), 2);

    // sequence ids are dense over valid ticks only
    let sequences: Vec<u64> = ticks.iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(ticks[1].volume, 2.5);
    assert_eq!(ticks[2].symbol, "GBPUSD");
    assert_eq!(ticks[0].exchange_time_ms, 1_700_000_000_000);
}

#[test]
fn test_subscriber_survives_invalid_utf8() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        drop(listener);
        // one write so both ticks sit in the client's buffer together
        let mut payload = Vec::new();
        payload.extend_from_slice(
            br#"{"type":"TICK","symbol":"EURUSD","bid":1.1,"ask":1.1002,"time":1}"#,
        );
        payload.extend_from_slice(b"\n\xff\xfe garbage\n");
        payload.extend_from_slice(
            br#"{"type":"TICK","symbol":"EURUSD","bid":1.1001,"ask":1.1003,"time":2}"#,
        );
        payload.push(b'\n');
        stream.write_all(&payload).unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(500));
    });

    let metrics = MetricsRegistry::new().unwrap();
    // no reconnect budget: a dropped connection would end the run with an error
    let source = TcpBroadcastSource::new(addr, BackoffConfig::fast(0));
    let mut subscriber =
        MarketDataSubscriber::new(source, Arc::new(AtomicBool::new(false))).with_metrics(metrics.clone());

    let mut ticks: Vec<TickEvent> = Vec::new();
    let mut sink = |tick: TickEvent| {
        ticks.push(tick);
        ticks.len() < 2
    };
    let stats = subscriber.run(&mut sink).unwrap();
    server.join().unwrap();

    assert_eq!(stats.messages, 3);
    assert_eq!(stats.ticks, 2);
    assert_eq!(stats.malformed, 1);
    assert_eq!(metrics.gateway().malformed_messages_total.get(), 1);
    assert_eq!(ticks[1].exchange_time_ms, 2);
}

#[test]
fn test_command_round_trip_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut requests = Vec::new();
        for ticket in [7001u64, 7002] {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            requests.push(decode_command(&line).unwrap());
            writeln!(writer, r#"{{"status":"FILLED","ticket":{},"price":1.10025}}"#, ticket).unwrap();
        }
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        writeln!(writer, r#"{{"status":"ERROR","retcode":10004}}"#).unwrap();
        requests
    });

    let transport = TcpCommandTransport::new(addr, Duration::from_secs(1));
    let mut client = CommandClient::new(transport, Duration::from_secs(1));
    let buy = OrderIntent {
        kind: OrderKind::Trade,
        symbol: "EURUSD".to_string(),
        volume: 0.25,
        side: Side::Buy,
    };

    assert_eq!(
        client.send_order(&buy).unwrap(),
        OrderResult::Filled { ticket: 7001, price: Some(1.10025) }
    );
    assert_eq!(
        client.submit(&buy).unwrap(),
        OrderResult::Filled { ticket: 7002, price: Some(1.10025) }
    );
    assert_eq!(client.submit(&buy).unwrap(), OrderResult::Rejected { retcode: 10004 });

    let requests = server.join().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], buy);
}

fn side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn kind() -> impl Strategy<Value = OrderKind> {
    prop_oneof![Just(OrderKind::Trade), Just(OrderKind::Execution)]
}

proptest! {
    #[test]
    fn prop_tick_wire_preserves_values(
        symbol in "[A-Z]{6}",
        bid in 0.0001f64..100_000.0,
        spread in 0.0f64..10.0,
        volume in 0.0f64..1_000_000.0,
        time in 0i64..4_000_000_000_000,
    ) {
        let mut tick = TickEvent::new(symbol, bid, bid + spread);
        tick.volume = volume;
        tick.exchange_time_ms = time;

        let line = encode_tick(&tick).unwrap();
        let decoded = TickDecoder::new().decode(&line).unwrap();

        prop_assert_eq!(&decoded.symbol, &tick.symbol);
        prop_assert_eq!(decoded.bid, tick.bid);
        prop_assert_eq!(decoded.ask, tick.ask);
        prop_assert_eq!(decoded.volume, tick.volume);
        prop_assert_eq!(decoded.exchange_time_ms, tick.exchange_time_ms);
    }

    #[test]
    fn prop_command_wire_preserves_values(
        symbol in "[A-Z]{3,8}",
        volume in 0.000_01f64..10_000.0,
        side in side(),
        kind in kind(),
    ) {
        let intent = OrderIntent { kind, symbol, volume, side };
        let decoded = decode_command(&encode_command(&intent).unwrap()).unwrap();
        prop_assert_eq!(decoded, intent);
    }
}
