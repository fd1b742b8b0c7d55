//! Static port-to-service fallback table
//!
//! When active detection is disabled or every probe comes back empty, the
//! detector labels an open port from this table at low confidence.

/// Confidence assigned to a port-table fallback label
pub const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Well-known service name for a port, if any
pub fn well_known_service(port: u16) -> Option<&'static str> {
    let name = match port {
        20 => "ftp-data",
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        80 | 81 | 8000 | 8008 | 8080 | 8081 | 8888 => "http",
        110 => "pop3",
        111 => "rpcbind",
        123 => "ntp",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        161 => "snmp",
        389 => "ldap",
        443 | 8443 | 9443 => "https",
        445 => "smb",
        465 => "smtps",
        587 => "submission",
        631 => "ipp",
        636 => "ldaps",
        993 => "imaps",
        995 => "pop3s",
        1433 => "mssql",
        1521 => "oracle",
        1723 => "pptp",
        1883 => "mqtt",
        2049 => "nfs",
        2375 | 2376 => "docker",
        3000 => "http",
        3128 => "http-proxy",
        3306 => "mysql",
        3389 => "rdp",
        5000 => "http",
        5432 => "postgresql",
        5672 => "amqp",
        5900 => "vnc",
        5985 | 5986 => "winrm",
        6379 => "redis",
        9092 => "kafka",
        9200 | 9300 => "elasticsearch",
        11211 => "memcached",
        27017 => "mongodb",
        _ => return None,
    };
    Some(name)
}
